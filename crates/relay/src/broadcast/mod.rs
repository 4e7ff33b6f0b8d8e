pub mod registry;
pub mod room;

use liveroom_common::protocol::live::MessageKind;
use serde_json::Value;

pub use registry::{BroadcastRegistry, HubStats};
pub use room::{Audience, LocalRoomHandle};

/// Fan-out seam used by the room coordinator. Implementations deliver only
/// to sessions attached on this instance.
pub trait RoomBroadcaster: Send + Sync {
    fn broadcast_room_update(&self, room_id: &str, kind: MessageKind, data: Value);
}

