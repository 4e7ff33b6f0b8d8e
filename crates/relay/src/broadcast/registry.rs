use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
};

use axum::extract::ws::Utf8Bytes;
use liveroom_common::protocol::live::{LiveMessage, MessageKind};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    room::{Audience, LocalRoomHandle},
    RoomBroadcaster,
};
use crate::ws::{protocol::encode_frame, session::SessionHandle};

/// Snapshot of local hub occupancy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub rooms: usize,
    pub sessions: usize,
    pub per_room: BTreeMap<String, usize>,
}

/// Process-local map of room id to broadcast room.
#[derive(Debug, Default)]
pub struct BroadcastRegistry {
    rooms: Mutex<HashMap<String, LocalRoomHandle>>,
}

impl BroadcastRegistry {
    fn rooms(&self) -> MutexGuard<'_, HashMap<String, LocalRoomHandle>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn room(&self, room_id: &str) -> Option<LocalRoomHandle> {
        self.rooms().get(room_id).cloned()
    }

    /// Attaches a session; `welcome` is its first frame.
    pub fn attach(
        &self,
        room_id: &str,
        session: SessionHandle,
        welcome: Option<Utf8Bytes>,
    ) -> LocalRoomHandle {
        let room = {
            let mut rooms = self.rooms();
            let room = rooms
                .entry(room_id.to_string())
                .or_insert_with(|| LocalRoomHandle::spawn(room_id))
                .clone();
            room.reserve_slot();
            room
        };
        room.register(session, welcome);
        room
    }

    /// Sends to the local room if one exists. Never creates a room.
    pub fn broadcast(&self, room_id: &str, message: &LiveMessage, audience: Audience) -> bool {
        let Some(room) = self.room(room_id) else {
            debug!(room_id, kind = message.kind.as_str(), "no local room; broadcast skipped");
            return false;
        };
        match encode_frame(message) {
            Ok(frame) => {
                room.broadcast(frame, audience);
                true
            }
            Err(error) => {
                warn!(room_id, error = %error, "failed to encode broadcast frame");
                false
            }
        }
    }

    /// Drops rooms with no attached sessions. Returns how many were removed.
    pub fn reap_idle(&self) -> usize {
        let mut rooms = self.rooms();
        let before = rooms.len();
        rooms.retain(|_, room| room.session_count() > 0);
        let reaped = before - rooms.len();
        if reaped > 0 {
            debug!(reaped, remaining = rooms.len(), "reaped idle broadcast rooms");
        }
        reaped
    }

    pub fn stats(&self) -> HubStats {
        let rooms = self.rooms();
        let per_room: BTreeMap<String, usize> =
            rooms.iter().map(|(room_id, room)| (room_id.clone(), room.session_count())).collect();
        HubStats { rooms: rooms.len(), sessions: per_room.values().sum(), per_room }
    }
}

impl RoomBroadcaster for BroadcastRegistry {
    fn broadcast_room_update(&self, room_id: &str, kind: MessageKind, data: Value) {
        let message = LiveMessage::system(kind, room_id, data);
        if !self.broadcast(room_id, &message, Audience::All) {
            return;
        }
        if kind == MessageKind::RoomClosed {
            if let Some(room) = self.room(room_id) {
                room.close_all();
            }
        }
    }
}
