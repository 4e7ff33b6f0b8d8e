// Input validation helpers.
//
// - `ValidatedJson<T>` extractor: content-type check + serde, mapped to
//   VALIDATION_FAILED errors.
// - Room field and chat content limits shared by the HTTP and WebSocket paths.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::{ErrorCode, RelayError};

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const MAX_CHAT_CHARS: usize = 300;

// ── ValidatedJson extractor ────────────────────────────────────────

/// A JSON body extractor that returns structured `RelayError` on failure.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => {
                let (message, details) = classify_json_rejection(&rejection);
                Err(RelayError::new(ErrorCode::ValidationFailed, message)
                    .with_details(details)
                    .into_response())
            }
        }
    }
}

fn classify_json_rejection(rejection: &JsonRejection) -> (String, serde_json::Value) {
    match rejection {
        JsonRejection::JsonDataError(e) => (
            format!("invalid JSON payload: {e}"),
            serde_json::json!({ "kind": "data_error" }),
        ),
        JsonRejection::JsonSyntaxError(e) => (
            format!("malformed JSON: {e}"),
            serde_json::json!({ "kind": "syntax_error" }),
        ),
        JsonRejection::MissingJsonContentType(_) => (
            "expected Content-Type: application/json".to_string(),
            serde_json::json!({ "kind": "missing_content_type" }),
        ),
        JsonRejection::BytesRejection(e) => (
            format!("request body error: {e}"),
            serde_json::json!({ "kind": "body_error" }),
        ),
        other => (
            format!("request body error: {other}"),
            serde_json::json!({ "kind": "unknown" }),
        ),
    }
}

// ── Room fields ────────────────────────────────────────────────────

/// Trims the title and rejects blank or oversized values.
pub fn normalize_title(title: &str) -> Result<String, String> {
    let title = title.trim();
    if title.is_empty() {
        return Err("title must not be empty".to_string());
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(format!("title must be at most {MAX_TITLE_CHARS} characters"));
    }
    Ok(title.to_string())
}

pub fn normalize_description(description: Option<&str>) -> Result<String, String> {
    let description = description.unwrap_or_default().trim();
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(format!("description must be at most {MAX_DESCRIPTION_CHARS} characters"));
    }
    Ok(description.to_string())
}

/// Chat lines are trimmed; blank lines are rejected.
pub fn normalize_chat_content(content: Option<&str>) -> Result<String, String> {
    let content = content.unwrap_or_default().trim();
    if content.is_empty() {
        return Err("chat content must not be empty".to_string());
    }
    if content.chars().count() > MAX_CHAT_CHARS {
        return Err(format!("chat content must be at most {MAX_CHAT_CHARS} characters"));
    }
    Ok(content.to_string())
}

/// Room ids come from path segments; only the shape `room_<alnum>` is accepted.
pub fn validate_room_id(room_id: &str) -> Result<(), String> {
    let Some(suffix) = room_id.strip_prefix("room_") else {
        return Err("room id must start with 'room_'".to_string());
    };
    if suffix.is_empty() || suffix.len() > 32 || !suffix.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err("room id is malformed".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        routing::post,
        Router,
    };
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Debug, Deserialize)]
    struct TestPayload {
        title: String,
    }

    async fn echo_handler(ValidatedJson(payload): ValidatedJson<TestPayload>) -> impl IntoResponse {
        (StatusCode::OK, payload.title)
    }

    fn test_app() -> Router {
        Router::new().route("/test", post(echo_handler))
    }

    #[tokio::test]
    async fn validated_json_accepts_valid_payload() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/test")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"title":"evening stream"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"evening stream");
    }

    #[tokio::test]
    async fn validated_json_rejects_missing_content_type() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/test")
                    .body(Body::from(r#"{"title":"x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"]["code"], "VALIDATION_FAILED");
        assert_eq!(parsed["error"]["details"]["kind"], "missing_content_type");
    }

    #[tokio::test]
    async fn validated_json_rejects_missing_field() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/test")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"description": "no title"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"]["details"]["kind"], "data_error");
    }

    #[test]
    fn title_is_trimmed_and_bounded() {
        assert_eq!(normalize_title("  hello ").unwrap(), "hello");
        assert!(normalize_title("   ").is_err());
        assert!(normalize_title(&"x".repeat(MAX_TITLE_CHARS + 1)).is_err());
    }

    #[test]
    fn description_defaults_to_empty() {
        assert_eq!(normalize_description(None).unwrap(), "");
        assert!(normalize_description(Some(&"y".repeat(MAX_DESCRIPTION_CHARS + 1))).is_err());
    }

    #[test]
    fn chat_content_rejects_blank_lines() {
        assert!(normalize_chat_content(None).is_err());
        assert!(normalize_chat_content(Some(" \n ")).is_err());
        assert_eq!(normalize_chat_content(Some(" hi ")).unwrap(), "hi");
    }

    #[test]
    fn room_ids_must_match_generated_shape() {
        assert!(validate_room_id("room_1a2b3c4d").is_ok());
        assert!(validate_room_id("room_").is_err());
        assert!(validate_room_id("lobby").is_err());
        assert!(validate_room_id("room_../etc").is_err());
    }
}
