// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The DB pool reads its own LIVEROOM_RELAY_DB_* variables.

use std::{net::SocketAddr, time::Duration};

const DEV_JWT_SECRET: &str = "liveroom_local_development_jwt_secret_must_be_32_chars";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 5 * 60;
const DEFAULT_VIEWER_COUNT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_MAX_VIEWERS: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// HS256 secret shared with the identity service.
    pub jwt_secret: String,
    /// Redis connection string for the shared room state.
    pub redis_url: Option<String>,
    /// PostgreSQL connection string for durable session records.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `liveroom_relay=debug`).
    pub log_filter: String,
    pub log_format: LogFormat,
    /// Period of the durability sync pass.
    pub sync_interval: Duration,
    /// Period of the creator's viewer-count broadcast.
    pub viewer_count_interval: Duration,
    /// Viewer cap recorded on new rooms.
    pub max_viewers: i64,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `LIVEROOM_RELAY_HOST` | `0.0.0.0` |
    /// | `LIVEROOM_RELAY_PORT` | `8080` |
    /// | `LIVEROOM_RELAY_JWT_SECRET` | dev-only placeholder |
    /// | `LIVEROOM_RELAY_REDIS_URL` | *(none, in-memory store)* |
    /// | `LIVEROOM_RELAY_DATABASE_URL` | *(none, in-memory store)* |
    /// | `LIVEROOM_RELAY_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    /// | `LIVEROOM_RELAY_LOG_FILTER` | `info` |
    /// | `LIVEROOM_RELAY_LOG_FORMAT` | `text` |
    /// | `LIVEROOM_RELAY_SYNC_INTERVAL_SECS` | `300` |
    /// | `LIVEROOM_RELAY_VIEWER_COUNT_INTERVAL_SECS` | `10` |
    /// | `LIVEROOM_RELAY_MAX_VIEWERS` | `1000` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("LIVEROOM_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("LIVEROOM_RELAY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("LIVEROOM_RELAY_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());

        let redis_url = env("LIVEROOM_RELAY_REDIS_URL").ok().filter(|v| !v.trim().is_empty());
        let database_url =
            env("LIVEROOM_RELAY_DATABASE_URL").ok().filter(|v| !v.trim().is_empty());
        let cors_origins = env("LIVEROOM_RELAY_CORS_ORIGINS").ok();

        let log_filter = env("LIVEROOM_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("LIVEROOM_RELAY_LOG_FORMAT").as_deref() {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let sync_interval = Duration::from_secs(positive_u64(
            &env,
            "LIVEROOM_RELAY_SYNC_INTERVAL_SECS",
            DEFAULT_SYNC_INTERVAL_SECS,
        ));
        let viewer_count_interval = Duration::from_secs(positive_u64(
            &env,
            "LIVEROOM_RELAY_VIEWER_COUNT_INTERVAL_SECS",
            DEFAULT_VIEWER_COUNT_INTERVAL_SECS,
        ));
        let max_viewers = env("LIVEROOM_RELAY_MAX_VIEWERS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_MAX_VIEWERS);

        Self {
            listen_addr,
            jwt_secret,
            redis_url,
            database_url,
            cors_origins,
            log_filter,
            log_format,
            sync_interval,
            viewer_count_interval,
            max_viewers,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn positive_u64<F>(env: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    env(key).ok().and_then(|v| v.parse::<u64>().ok()).filter(|v| *v > 0).unwrap_or(default)
}
