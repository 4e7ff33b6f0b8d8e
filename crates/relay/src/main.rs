mod api;
mod auth;
mod broadcast;
mod config;
mod coordinator;
mod cors;
mod db;
mod error;
mod metrics;
mod store;
mod sync;
mod validation;
mod ws;

use std::{sync::Arc, time::Duration, time::Instant};

use anyhow::Context;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header::CONTENT_TYPE, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    api::ApiState,
    auth::jwt::JwtAccessTokenService,
    broadcast::BroadcastRegistry,
    config::{LogFormat, RelayConfig},
    coordinator::RoomCoordinator,
    db::{
        migrations::run_migrations,
        pool::{check_pool_health, create_pg_pool, PoolConfig},
        sessions::DurableSessionStore,
    },
    error::{attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope},
    metrics::RelayMetrics,
    store::{MemorySharedStore, RedisSharedStore, SharedStore},
    sync::{spawn_periodic_sync, SessionSyncer},
    ws::LiveState,
};

const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();
    init_tracing(&config);

    if config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set LIVEROOM_RELAY_JWT_SECRET outside local development");
    }
    let jwt_service =
        Arc::new(JwtAccessTokenService::new(&config.jwt_secret).context("invalid relay JWT secret")?);

    let store: Arc<dyn SharedStore> = match config.redis_url.as_deref() {
        Some(redis_url) => {
            let store = RedisSharedStore::connect(redis_url)
                .await
                .context("failed to connect to the shared room store")?;
            store.check_health().await.context("shared room store health check failed")?;
            Arc::new(store)
        }
        None => {
            warn!("LIVEROOM_RELAY_REDIS_URL is unset; room state is local to this process");
            Arc::new(MemorySharedStore::default())
        }
    };

    let sessions = match config.database_url.as_deref() {
        Some(database_url) => {
            let pool = create_pg_pool(database_url, PoolConfig::from_env())
                .await
                .context("failed to initialize relay PostgreSQL pool")?;
            check_pool_health(&pool).await.context("relay PostgreSQL health check failed")?;
            run_migrations(&pool).await?;
            DurableSessionStore::Postgres(pool)
        }
        None => {
            warn!("LIVEROOM_RELAY_DATABASE_URL is unset; session records are kept in memory");
            DurableSessionStore::memory()
        }
    };

    let relay_metrics = Arc::new(RelayMetrics::default());
    metrics::set_global_metrics(Arc::clone(&relay_metrics));

    let shutdown = CancellationToken::new();
    let registry = Arc::new(BroadcastRegistry::default());
    let syncer = Arc::new(SessionSyncer::new(Arc::clone(&store), sessions));
    let coordinator = RoomCoordinator::new(
        store,
        registry.clone(),
        Arc::clone(&syncer),
        config.max_viewers,
    );
    let sync_task = spawn_periodic_sync(
        syncer,
        Some(Arc::clone(&registry)),
        config.sync_interval,
        shutdown.clone(),
    );

    let app = build_router(AppContext {
        coordinator,
        registry,
        jwt_service,
        metrics: relay_metrics,
        shutdown: shutdown.clone(),
        viewer_count_interval: config.viewer_count_interval,
        cors_origins: config.cors_origins.clone(),
    });

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting relay server");

    let serve_shutdown = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            serve_shutdown.cancel();
        })
        .await
        .context("relay server exited unexpectedly");

    shutdown.cancel();
    if let Err(join_error) = sync_task.await {
        warn!(?join_error, "durability sync task panicked");
    }
    info!("relay server stopped");

    served
}

fn init_tracing(config: &RelayConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

struct AppContext {
    coordinator: RoomCoordinator,
    registry: Arc<BroadcastRegistry>,
    jwt_service: Arc<JwtAccessTokenService>,
    metrics: Arc<RelayMetrics>,
    shutdown: CancellationToken,
    viewer_count_interval: Duration,
    cors_origins: Option<String>,
}

fn build_router(context: AppContext) -> Router {
    let live = ws::router(LiveState {
        coordinator: context.coordinator.clone(),
        registry: Arc::clone(&context.registry),
        jwt_service: Arc::clone(&context.jwt_service),
        shutdown: context.shutdown,
        viewer_count_interval: context.viewer_count_interval,
    });
    let rooms = api::build_router(
        ApiState { coordinator: context.coordinator, registry: context.registry },
        context.jwt_service,
    );
    let metrics_route =
        Router::new().route("/metrics", get(render_metrics)).with_state(Arc::clone(&context.metrics));

    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(metrics_route)
            .merge(live)
            .merge(rooms)
            .layer(cors::cors_layer(context.cors_origins.as_deref())),
        context.metrics,
    )
}

fn apply_middleware(router: Router, metrics: Arc<RelayMetrics>) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn_with_state(metrics, request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn render_metrics(State(metrics): State<Arc<RelayMetrics>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        metrics.render_prometheus(),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(
    State(metrics): State<Arc<RelayMetrics>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    let status = response.status().as_u16();
    let latency_ms = started_at.elapsed().as_millis() as u64;
    metrics.record_http_request(method.as_str(), &path, status, latency_ms);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status,
        latency_ms,
        "request completed"
    );

    response
}
