// WebSocket message types for live room connections.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::RoomRole;

/// Maximum number of chat messages retained per room.
pub const CHAT_HISTORY_LIMIT: usize = 100;

/// Discriminator carried in the `type` field of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Server -> Client: sent once after the session is attached.
    Welcome,
    /// Bidirectional: a chat line.
    Chat,
    /// Server -> Creator: a session for this room connected.
    UserJoined,
    /// Server -> Creator: a session for this room disconnected.
    UserLeft,
    /// Server -> Client: periodic viewer count refresh.
    ViewerCountUpdate,
    LiveStarted,
    LiveEnded,
    RoomClosed,
    /// Client -> Server: application level keep-alive.
    Ping,
    Pong,
    /// Server -> Client: an inbound frame was rejected.
    Error,
    /// Any type this build does not know about.
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Chat => "chat",
            Self::UserJoined => "user_joined",
            Self::UserLeft => "user_left",
            Self::ViewerCountUpdate => "viewer_count_update",
            Self::LiveStarted => "live_started",
            Self::LiveEnded => "live_ended",
            Self::RoomClosed => "room_closed",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// A single frame on a live room connection.
///
/// System events leave `user_id` unset. Clients only need to send `type`
/// and, for chat, `content`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiveMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RoomRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Unix seconds.
    #[serde(default)]
    pub timestamp: i64,
}

impl LiveMessage {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            room_id: None,
            user_id: None,
            username: None,
            role: None,
            content: None,
            data: None,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn system(kind: MessageKind, room_id: &str, data: Value) -> Self {
        Self { room_id: Some(room_id.to_string()), data: Some(data), ..Self::new(kind) }
    }

    pub fn chat(
        room_id: &str,
        user_id: Uuid,
        username: &str,
        role: RoomRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            room_id: Some(room_id.to_string()),
            user_id: Some(user_id),
            username: Some(username.to_string()),
            role: Some(role),
            content: Some(content.into()),
            ..Self::new(MessageKind::Chat)
        }
    }

    pub fn pong(room_id: &str) -> Self {
        Self { room_id: Some(room_id.to_string()), ..Self::new(MessageKind::Pong) }
    }

    pub fn error(room_id: &str, message: impl Into<String>) -> Self {
        Self {
            room_id: Some(room_id.to_string()),
            content: Some(message.into()),
            ..Self::new(MessageKind::Error)
        }
    }
}
