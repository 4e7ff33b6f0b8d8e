mod rooms;

use std::sync::Arc;

use axum::{
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use liveroom_common::types::RoomDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::{jwt::JwtAccessTokenService, middleware::require_bearer_auth},
    broadcast::BroadcastRegistry,
    coordinator::{RoomCoordinator, RoomError},
    error::{ErrorCode, RelayError},
};

use self::rooms::{
    close_room, create_room, end_live, get_room, get_user_role, hub_stats, join_room, leave_room,
    list_active_rooms, list_all_rooms, recent_chat, start_live,
};

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: RoomCoordinator,
    pub registry: Arc<BroadcastRegistry>,
}

#[derive(Debug, Deserialize)]
struct CreateRoomRequest {
    title: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct DataEnvelope<T> {
    message: &'static str,
    data: T,
}

impl<T> DataEnvelope<T> {
    fn new(message: &'static str, data: T) -> Self {
        Self { message, data }
    }
}

type RoomEnvelope = DataEnvelope<RoomDescriptor>;

#[derive(Debug, Serialize)]
struct ListEnvelope {
    message: &'static str,
    data: Vec<RoomDescriptor>,
    total: usize,
}

impl ListEnvelope {
    /// Stream keys are only shown to the caller's own rooms.
    fn new(message: &'static str, rooms: Vec<RoomDescriptor>, caller: Uuid) -> Self {
        let data: Vec<RoomDescriptor> = rooms.into_iter().map(|room| room.visible_to(caller)).collect();
        Self { message, total: data.len(), data }
    }
}

#[derive(Debug)]
enum ApiError {
    Room(RoomError),
    Forbidden(&'static str),
}

impl From<RoomError> for ApiError {
    fn from(error: RoomError) -> Self {
        Self::Room(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Forbidden(message) => RelayError::new(ErrorCode::AuthForbidden, message).into_response(),
            Self::Room(error) => RelayError::from(error).into_response(),
        }
    }
}

impl From<RoomError> for RelayError {
    fn from(error: RoomError) -> Self {
        match error {
            RoomError::Validation(message) => RelayError::new(ErrorCode::ValidationFailed, message),
            RoomError::RoomNotFound(_) => RelayError::new(ErrorCode::NotFound, "room not found"),
            RoomError::NotMember(_) => {
                RelayError::new(ErrorCode::NotFound, "user is not a member of this room")
            }
            RoomError::NotCreator { .. } => {
                RelayError::new(ErrorCode::AuthForbidden, error.to_string())
            }
            RoomError::StateConflict { message, current } => {
                RelayError::new(ErrorCode::RoomStateConflict, message)
                    .with_details(json!({ "current_status": current }))
            }
            RoomError::Store(ref source) | RoomError::Durable(ref source) => {
                tracing::error!(error = ?source, "room api internal error");
                RelayError::from_code(ErrorCode::InternalError)
            }
        }
    }
}

pub fn build_router(state: ApiState, jwt_service: Arc<JwtAccessTokenService>) -> Router {
    Router::new()
        .route("/v1/rooms", post(create_room).get(list_all_rooms))
        .route("/v1/rooms/active", get(list_active_rooms))
        .route("/v1/rooms/stats", get(hub_stats))
        .route("/v1/rooms/{room_id}", get(get_room))
        .route("/v1/rooms/{room_id}/join", post(join_room))
        .route("/v1/rooms/{room_id}/leave", post(leave_room))
        .route("/v1/rooms/{room_id}/start", post(start_live))
        .route("/v1/rooms/{room_id}/end", post(end_live))
        .route("/v1/rooms/{room_id}/close", post(close_room))
        .route("/v1/rooms/{room_id}/role", get(get_user_role))
        .route("/v1/rooms/{room_id}/chat", get(recent_chat))
        .with_state(state)
        .route_layer(middleware::from_fn_with_state(jwt_service, require_bearer_auth))
}
