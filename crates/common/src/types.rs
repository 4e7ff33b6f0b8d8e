// Core room types shared across all Liveroom crates.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a room. A closed room has no state at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Created,
    Live,
    Ended,
    /// Terminal state written by moderation tooling. Rooms in this state
    /// cannot be joined.
    Cancelled,
}

impl RoomStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Live => "live",
            Self::Ended => "ended",
            Self::Cancelled => "cancelled",
        }
    }

    /// A creator holding a room in one of these states may not create another.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Created | Self::Live)
    }

    pub const fn can_start(self) -> bool {
        matches!(self, Self::Created | Self::Ended)
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown room status '{0}'")]
pub struct UnknownRoomStatus(pub String);

impl FromStr for RoomStatus {
    type Err = UnknownRoomStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "created" => Ok(Self::Created),
            "live" => Ok(Self::Live),
            "ended" => Ok(Self::Ended),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownRoomStatus(other.to_string())),
        }
    }
}

/// Role a member holds inside one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomRole {
    Creator,
    Viewer,
}

impl RoomRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creator => "creator",
            Self::Viewer => "viewer",
        }
    }

    pub fn for_member(creator_id: Uuid, user_id: Uuid) -> Self {
        if creator_id == user_id {
            Self::Creator
        } else {
            Self::Viewer
        }
    }
}

impl fmt::Display for RoomRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown room role '{0}'")]
pub struct UnknownRoomRole(pub String);

impl FromStr for RoomRole {
    type Err = UnknownRoomRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "creator" => Ok(Self::Creator),
            "viewer" => Ok(Self::Viewer),
            other => Err(UnknownRoomRole(other.to_string())),
        }
    }
}

/// Public view of a room as returned by the room API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomDescriptor {
    pub room_id: String,
    pub title: String,
    pub description: String,
    pub creator_id: Uuid,
    pub status: RoomStatus,
    /// Only present when the caller is the room creator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_key: Option<String>,
    /// Connected viewers, excluding the creator.
    pub viewer_count: i64,
    pub max_viewers: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoomDescriptor {
    pub fn visible_to(mut self, user_id: Uuid) -> Self {
        if self.creator_id != user_id {
            self.stream_key = None;
        }
        self
    }
}

/// One entry of a room's bounded chat history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRecord {
    pub user_id: Uuid,
    pub username: String,
    pub role: RoomRole,
    pub content: String,
    /// Unix seconds.
    pub timestamp: i64,
}
