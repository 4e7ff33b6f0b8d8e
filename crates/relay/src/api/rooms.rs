use axum::{
    extract::{Extension, Json, Path, Query, State},
    http::StatusCode,
};
use serde_json::json;

use crate::{auth::middleware::AuthenticatedUser, validation::ValidatedJson};

use super::{
    ApiError, ApiState, CreateRoomRequest, DataEnvelope, ListEnvelope, ListQuery, RoomEnvelope,
};

pub(super) async fn create_room(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(payload): ValidatedJson<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomEnvelope>), ApiError> {
    let room = state
        .coordinator
        .create_room(user.user_id, &payload.title, payload.description.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(DataEnvelope::new("room created", room))))
}

pub(super) async fn list_active_rooms(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListEnvelope>, ApiError> {
    let rooms = state.coordinator.get_active_rooms(query.limit).await?;
    Ok(Json(ListEnvelope::new("active rooms", rooms, user.user_id)))
}

pub(super) async fn list_all_rooms(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListEnvelope>, ApiError> {
    let rooms = state.coordinator.get_all_rooms(query.limit).await?;
    Ok(Json(ListEnvelope::new("rooms", rooms, user.user_id)))
}

pub(super) async fn get_room(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomEnvelope>, ApiError> {
    let room = state.coordinator.get_room(&room_id).await?.visible_to(user.user_id);
    Ok(Json(DataEnvelope::new("room", room)))
}

pub(super) async fn join_room(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(room_id): Path<String>,
) -> Result<Json<DataEnvelope<serde_json::Value>>, ApiError> {
    let outcome = state.coordinator.join_room(&room_id, user.user_id).await?;
    let message = if outcome.joined { "joined room" } else { "already a member" };

    Ok(Json(DataEnvelope::new(
        message,
        json!({ "room_id": room_id, "role": outcome.role, "joined": outcome.joined }),
    )))
}

pub(super) async fn leave_room(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(room_id): Path<String>,
) -> Result<Json<DataEnvelope<serde_json::Value>>, ApiError> {
    let left = state.coordinator.leave_room(&room_id, user.user_id).await?;
    Ok(Json(DataEnvelope::new("left room", json!({ "room_id": room_id, "left": left }))))
}

pub(super) async fn start_live(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomEnvelope>, ApiError> {
    let room = state.coordinator.start_live(&room_id, user.user_id).await?;
    Ok(Json(DataEnvelope::new("live stream started", room)))
}

pub(super) async fn end_live(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomEnvelope>, ApiError> {
    let room = state.coordinator.end_live(&room_id, user.user_id).await?;
    Ok(Json(DataEnvelope::new("live stream ended", room)))
}

pub(super) async fn close_room(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(room_id): Path<String>,
) -> Result<Json<DataEnvelope<serde_json::Value>>, ApiError> {
    state.coordinator.close_room(&room_id, user.user_id).await?;
    Ok(Json(DataEnvelope::new("room closed", json!({ "room_id": room_id }))))
}

pub(super) async fn get_user_role(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(room_id): Path<String>,
) -> Result<Json<DataEnvelope<serde_json::Value>>, ApiError> {
    let role = state.coordinator.get_user_role(&room_id, user.user_id).await?;
    Ok(Json(DataEnvelope::new("role", json!({ "room_id": room_id, "role": role }))))
}

pub(super) async fn recent_chat(
    State(state): State<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(room_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DataEnvelope<serde_json::Value>>, ApiError> {
    state.coordinator.get_room(&room_id).await?;
    if !state.coordinator.is_member(&room_id, user.user_id).await? {
        return Err(ApiError::Forbidden("join the room to read its chat"));
    }

    let messages = state.coordinator.recent_chat(&room_id, query.limit).await?;
    let total = messages.len();
    Ok(Json(DataEnvelope::new(
        "recent chat",
        json!({ "room_id": room_id, "messages": messages, "total": total }),
    )))
}

pub(super) async fn hub_stats(State(state): State<ApiState>) -> Json<DataEnvelope<serde_json::Value>> {
    let stats = state.registry.stats();
    Json(DataEnvelope::new("local hub statistics", json!(stats)))
}
