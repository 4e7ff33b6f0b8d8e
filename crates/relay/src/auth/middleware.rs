use crate::{
    auth::jwt::{JwtAccessTokenService, UserIdentity},
    error::{ErrorCode, RelayError},
};
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: uuid::Uuid,
    pub platform_role: String,
    pub username: String,
}

impl From<UserIdentity> for AuthenticatedUser {
    fn from(identity: UserIdentity) -> Self {
        let username = identity.username();
        Self { user_id: identity.user_id, platform_role: identity.role, username }
    }
}

pub async fn require_bearer_auth(
    State(jwt_service): State<Arc<JwtAccessTokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token_from_headers(request.headers()) {
        Some(token) => token,
        None => return unauthorized_response("missing bearer token"),
    };

    let identity = match jwt_service.validate_user_token(token) {
        Ok(identity) => identity,
        Err(_) => return unauthorized_response("invalid bearer token"),
    };

    request.extensions_mut().insert(AuthenticatedUser::from(identity));

    next.run(request).await
}

/// Browsers cannot set headers on WebSocket upgrades, so the `token` query
/// parameter is checked before the Authorization header.
pub fn authenticate_upgrade(
    jwt_service: &JwtAccessTokenService,
    query_token: Option<&str>,
    headers: &HeaderMap,
) -> Result<AuthenticatedUser, RelayError> {
    let token = query_token
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .or_else(|| bearer_token_from_headers(headers))
        .ok_or_else(|| RelayError::new(ErrorCode::AuthInvalidToken, "missing access token"))?;

    jwt_service
        .validate_user_token(token)
        .map(AuthenticatedUser::from)
        .map_err(|_| RelayError::new(ErrorCode::AuthInvalidToken, "invalid access token"))
}

fn bearer_token_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()).and_then(extract_bearer_token)
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn unauthorized_response(message: &'static str) -> Response {
    RelayError::new(ErrorCode::AuthInvalidToken, message).into_response()
}

#[cfg(test)]
mod tests {
    use super::{authenticate_upgrade, extract_bearer_token, require_bearer_auth, AuthenticatedUser};
    use crate::auth::jwt::JwtAccessTokenService;
    use axum::{
        body::Body,
        extract::Extension,
        http::{header::AUTHORIZATION, HeaderMap, HeaderValue, Request, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    const TEST_SECRET: &str = "liveroom_test_secret_that_is_definitely_long_enough";

    fn protected_app(jwt_service: Arc<JwtAccessTokenService>) -> Router {
        Router::new()
            .route(
                "/protected",
                get(|Extension(user): Extension<AuthenticatedUser>| async move {
                    format!("{}:{}", user.user_id, user.username)
                }),
            )
            .layer(middleware::from_fn_with_state(jwt_service, require_bearer_auth))
    }

    #[tokio::test]
    async fn rejects_requests_without_bearer_token() {
        let app = protected_app(Arc::new(
            JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize"),
        ));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_requests_with_invalid_bearer_token() {
        let app = protected_app(Arc::new(
            JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize"),
        ));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header(AUTHORIZATION, "Bearer invalid-token")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn injects_authenticated_user_for_valid_bearer_token() {
        let service =
            Arc::new(JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize"));
        let token = service
            .issue_user_token(Uuid::new_v4(), "user", Some("host"))
            .expect("token should be issued");

        let response = protected_app(service)
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should return a response");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(extract_bearer_token("bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
        assert_eq!(extract_bearer_token("Bearer   "), None);
    }

    #[test]
    fn upgrade_auth_prefers_query_token_over_header() {
        let service = JwtAccessTokenService::new(TEST_SECRET).expect("service should initialize");
        let query_user = Uuid::new_v4();
        let query_token =
            service.issue_user_token(query_user, "user", None).expect("token should be issued");
        let header_token =
            service.issue_user_token(Uuid::new_v4(), "user", None).expect("token should be issued");
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {header_token}")).expect("header value"),
        );

        let user = authenticate_upgrade(&service, Some(&query_token), &headers)
            .expect("query token should authenticate");
        assert_eq!(user.user_id, query_user);

        let fallback =
            authenticate_upgrade(&service, Some(""), &headers).expect("header should authenticate");
        assert_ne!(fallback.user_id, query_user);

        assert!(authenticate_upgrade(&service, None, &HeaderMap::new()).is_err());
    }
}
