use std::time::Duration;

use axum::{
    extract::{ws::WebSocket, Path, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use liveroom_common::{
    protocol::live::{LiveMessage, MessageKind},
    types::{ChatRecord, RoomDescriptor, RoomRole},
};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    protocol as ws_protocol,
    session::{
        read_next, run_write_pump, split_socket, ReadEvent, SessionHandle,
        MAX_INBOUND_FRAME_BYTES, OUTBOUND_QUEUE_CAPACITY,
    },
    LiveState,
};
use crate::{
    auth::middleware::{authenticate_upgrade, AuthenticatedUser},
    broadcast::{Audience, BroadcastRegistry},
    coordinator::{RoomCoordinator, RoomError},
    error::{request_id_from_headers_or_generate, with_request_id_scope, ErrorCode, RelayError},
    metrics,
    validation::normalize_chat_content,
};

#[derive(Debug, Default, Deserialize)]
pub struct UpgradeQuery {
    pub token: Option<String>,
}

pub async fn ws_upgrade(
    Path(room_id): Path<String>,
    Query(query): Query<UpgradeQuery>,
    State(state): State<LiveState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let room_id = room_id.trim().to_string();
    if room_id.is_empty() {
        return RelayError::new(ErrorCode::ValidationFailed, "room id is required").into_response();
    }

    let user = match authenticate_upgrade(&state.jwt_service, query.token.as_deref(), &headers) {
        Ok(user) => user,
        Err(rejection) => return rejection.into_response(),
    };

    let room = match state.coordinator.get_room(&room_id).await {
        Ok(room) => room,
        Err(RoomError::RoomNotFound(_)) => {
            return RelayError::new(ErrorCode::NotFound, "room not found").into_response();
        }
        Err(error) => {
            error!(error = ?error, room_id = %room_id, "failed to load room for websocket upgrade");
            return RelayError::from_code(ErrorCode::InternalError).into_response();
        }
    };

    let role = match state.coordinator.get_user_role(&room_id, user.user_id).await {
        Ok(role) => role,
        Err(RoomError::NotMember(_)) => {
            return RelayError::new(ErrorCode::AuthForbidden, "join the room before connecting")
                .into_response();
        }
        Err(RoomError::RoomNotFound(_)) => {
            return RelayError::new(ErrorCode::NotFound, "room not found").into_response();
        }
        Err(error) => {
            error!(error = ?error, room_id = %room_id, user_id = %user.user_id, "failed to resolve room role");
            return RelayError::from_code(ErrorCode::InternalError).into_response();
        }
    };

    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_message_size(MAX_INBOUND_FRAME_BYTES).on_upgrade(move |socket| async move {
        with_request_id_scope(request_id, handle_socket(state, room, user, role, socket)).await;
    })
}

async fn handle_socket(
    state: LiveState,
    room: RoomDescriptor,
    user: AuthenticatedUser,
    role: RoomRole,
    socket: WebSocket,
) {
    let room_id = room.room_id.clone();
    let (session, outbound) = SessionHandle::new(
        user.user_id,
        user.username.clone(),
        role,
        OUTBOUND_QUEUE_CAPACITY,
        &state.shutdown,
    );
    let session_id = session.session_id;
    let closed = session.closed_token();

    let (sink, mut stream) = split_socket(socket);
    let writer = tokio::spawn(run_write_pump(sink, outbound, closed.clone(), session_id));

    let welcome = LiveMessage::system(
        MessageKind::Welcome,
        &room_id,
        json!({
            "message": format!("welcome to {}", room.title),
            "viewer_count": room.viewer_count,
            "room_status": room.status,
        }),
    );
    let welcome = match ws_protocol::encode_frame(&welcome) {
        Ok(frame) => Some(frame),
        Err(error) => {
            warn!(room_id = %room_id, error = %error, "failed to encode welcome frame");
            None
        }
    };
    let local_room = state.registry.attach(&room_id, session.clone(), welcome);
    metrics::increment_ws_connections();
    info!(room_id = %room_id, user_id = %user.user_id, role = role.as_str(), session_id = %session_id, "live session attached");

    if role == RoomRole::Viewer {
        notify_creator(&state, &room_id, &user, role, MessageKind::UserJoined).await;
    }

    let ticker = (role == RoomRole::Creator).then(|| {
        spawn_viewer_count_ticker(
            state.coordinator.clone(),
            state.registry.clone(),
            room_id.clone(),
            state.viewer_count_interval,
            closed.child_token(),
        )
    });

    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            event = read_next(&mut stream) => match event {
                ReadEvent::Text(text) => handle_inbound(&state, &session, &room_id, text.as_str()).await,
                ReadEvent::KeepAlive => {}
                ReadEvent::Closed => break,
                ReadEvent::TimedOut => {
                    debug!(session_id = %session_id, "read deadline exceeded");
                    break;
                }
                ReadEvent::Violation(reason) => {
                    warn!(session_id = %session_id, room_id = %room_id, reason = %reason, "closing session after protocol violation");
                    metrics::record_ws_message("violation", true);
                    break;
                }
            },
        }
    }

    session.close();
    local_room.unregister(session_id);
    if let Err(join_error) = writer.await {
        warn!(session_id = %session_id, ?join_error, "write pump panicked");
    }
    if let Some(ticker) = ticker {
        let _ = ticker.await;
    }

    if role == RoomRole::Viewer {
        notify_creator(&state, &room_id, &user, role, MessageKind::UserLeft).await;
    }
    info!(room_id = %room_id, user_id = %user.user_id, session_id = %session_id, "live session detached");
}

async fn handle_inbound(state: &LiveState, session: &SessionHandle, room_id: &str, raw: &str) {
    let message = match ws_protocol::decode_message(raw) {
        Ok(message) => message,
        Err(error) => {
            debug!(session_id = %session.session_id, error = %error, "ignoring undecodable frame");
            metrics::record_ws_message("invalid", true);
            let _ = session.try_deliver_message(&LiveMessage::error(room_id, "malformed message"));
            return;
        }
    };

    match message.kind {
        MessageKind::Chat => handle_chat(state, session, room_id, message.content.as_deref()).await,
        MessageKind::Ping => {
            metrics::record_ws_message(MessageKind::Ping.as_str(), false);
            let _ = session.try_deliver_message(&LiveMessage::pong(room_id));
        }
        other => {
            metrics::record_ws_message(other.as_str(), false);
            debug!(session_id = %session.session_id, kind = other.as_str(), "ignoring inbound message type");
        }
    }
}

async fn handle_chat(
    state: &LiveState,
    session: &SessionHandle,
    room_id: &str,
    content: Option<&str>,
) {
    let content = match normalize_chat_content(content) {
        Ok(content) => content,
        Err(reason) => {
            metrics::record_ws_message(MessageKind::Chat.as_str(), true);
            let _ = session.try_deliver_message(&LiveMessage::error(room_id, reason));
            return;
        }
    };
    metrics::record_ws_message(MessageKind::Chat.as_str(), false);

    let chat = LiveMessage::chat(room_id, session.user_id, &session.username, session.role, content);
    state.registry.broadcast(room_id, &chat, Audience::All);

    let record = ChatRecord {
        user_id: session.user_id,
        username: session.username.clone(),
        role: session.role,
        content: chat.content.clone().unwrap_or_default(),
        timestamp: chat.timestamp,
    };
    if let Err(error) = state.coordinator.append_chat(room_id, &record).await {
        warn!(room_id, error = %error, "failed to append chat history");
    }
}

/// Tells the room creator's sessions that a viewer connected or disconnected.
async fn notify_creator(
    state: &LiveState,
    room_id: &str,
    user: &AuthenticatedUser,
    role: RoomRole,
    kind: MessageKind,
) {
    let viewer_count = match state.coordinator.get_room(room_id).await {
        Ok(room) => Some(room.viewer_count),
        Err(error) => {
            debug!(room_id, error = %error, "viewer count unavailable for presence event");
            None
        }
    };
    let message = LiveMessage {
        user_id: Some(user.user_id),
        username: Some(user.username.clone()),
        role: Some(role),
        ..LiveMessage::system(
            kind,
            room_id,
            json!({
                "user_id": user.user_id,
                "username": user.username,
                "viewer_count": viewer_count,
            }),
        )
    };
    state.registry.broadcast(room_id, &message, Audience::Role(RoomRole::Creator));
}

/// Broadcasts the room's viewer count until `cancel` fires or the room is
/// gone from the shared store.
fn spawn_viewer_count_ticker(
    coordinator: RoomCoordinator,
    registry: std::sync::Arc<BroadcastRegistry>,
    room_id: String,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.reset();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match coordinator.get_room(&room_id).await {
                Ok(room) => {
                    let update = LiveMessage::system(
                        MessageKind::ViewerCountUpdate,
                        &room_id,
                        json!({ "viewer_count": room.viewer_count, "room_status": room.status }),
                    );
                    registry.broadcast(&room_id, &update, Audience::All);
                }
                Err(RoomError::RoomNotFound(_)) => {
                    debug!(room_id = %room_id, "room is gone; stopping viewer count updates");
                    break;
                }
                Err(error) => {
                    warn!(room_id = %room_id, error = %error, "viewer count refresh failed");
                }
            }
        }
    })
}
