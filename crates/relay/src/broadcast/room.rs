// Local broadcast room: one actor task per room serializes register,
// unregister and broadcast so every session attached before a broadcast
// receives it, in order.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use axum::extract::ws::Utf8Bytes;
use liveroom_common::types::RoomRole;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{metrics, ws::session::SessionHandle};

/// Which sessions in a room receive a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    Role(RoomRole),
}

impl Audience {
    fn includes(self, role: RoomRole) -> bool {
        match self {
            Self::All => true,
            Self::Role(target) => target == role,
        }
    }
}

#[derive(Debug)]
pub(crate) enum RoomCommand {
    Register { session: SessionHandle, welcome: Option<Utf8Bytes> },
    Unregister { session_id: Uuid },
    Broadcast { frame: Utf8Bytes, audience: Audience },
    /// Closes every session after its already-queued frames.
    CloseAll,
}

/// Cheap handle to a running room actor.
#[derive(Debug, Clone)]
pub struct LocalRoomHandle {
    room_id: Arc<str>,
    commands: mpsc::UnboundedSender<RoomCommand>,
    session_count: Arc<AtomicUsize>,
}

impl LocalRoomHandle {
    /// Starts the actor for `room_id`. Must be called inside a Tokio runtime.
    pub(crate) fn spawn(room_id: &str) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let session_count = Arc::new(AtomicUsize::new(0));
        let room_id: Arc<str> = Arc::from(room_id);

        tokio::spawn(run_room(Arc::clone(&room_id), receiver, Arc::clone(&session_count)));

        Self { room_id, commands, session_count }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn session_count(&self) -> usize {
        self.session_count.load(Ordering::SeqCst)
    }

    /// Reserves a slot; the registry calls this under its lock so an idle
    /// sweep never removes a room that is being attached to.
    pub(crate) fn reserve_slot(&self) {
        self.session_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn register(&self, session: SessionHandle, welcome: Option<Utf8Bytes>) {
        let session_id = session.session_id;
        if self.commands.send(RoomCommand::Register { session, welcome }).is_err() {
            self.session_count.fetch_sub(1, Ordering::SeqCst);
            warn!(room_id = %self.room_id, session_id = %session_id, "room actor is gone; register dropped");
        }
    }

    pub fn unregister(&self, session_id: Uuid) {
        let _ = self.commands.send(RoomCommand::Unregister { session_id });
    }

    pub fn broadcast(&self, frame: Utf8Bytes, audience: Audience) {
        let _ = self.commands.send(RoomCommand::Broadcast { frame, audience });
    }

    pub fn close_all(&self) {
        let _ = self.commands.send(RoomCommand::CloseAll);
    }
}

async fn run_room(
    room_id: Arc<str>,
    mut commands: mpsc::UnboundedReceiver<RoomCommand>,
    session_count: Arc<AtomicUsize>,
) {
    let mut sessions: HashMap<Uuid, SessionHandle> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            RoomCommand::Register { session, welcome } => {
                let session_id = session.session_id;
                if let Some(frame) = welcome {
                    if let Err(failure) = session.try_deliver(frame) {
                        warn!(room_id = %room_id, session_id = %session_id, ?failure, "welcome undeliverable; dropping session");
                        session.close();
                        session_count.fetch_sub(1, Ordering::SeqCst);
                        continue;
                    }
                }
                if let Some(previous) = sessions.insert(session_id, session) {
                    // Same session registered twice; keep the slot count exact.
                    previous.close();
                    session_count.fetch_sub(1, Ordering::SeqCst);
                }
                debug!(room_id = %room_id, session_id = %session_id, sessions = sessions.len(), "session attached");
            }
            RoomCommand::Unregister { session_id } => {
                if let Some(session) = sessions.remove(&session_id) {
                    session.close();
                    session_count.fetch_sub(1, Ordering::SeqCst);
                    debug!(room_id = %room_id, session_id = %session_id, sessions = sessions.len(), "session detached");
                }
            }
            RoomCommand::Broadcast { frame, audience } => {
                let mut evicted = Vec::new();
                for (session_id, session) in &sessions {
                    if !audience.includes(session.role) {
                        continue;
                    }
                    if let Err(failure) = session.try_deliver(frame.clone()) {
                        warn!(room_id = %room_id, session_id = %session_id, user_id = %session.user_id, ?failure, "evicting session");
                        evicted.push(*session_id);
                    }
                }
                for session_id in evicted {
                    if let Some(session) = sessions.remove(&session_id) {
                        session.close();
                        session_count.fetch_sub(1, Ordering::SeqCst);
                        metrics::increment_broadcast_evictions();
                    }
                }
            }
            RoomCommand::CloseAll => {
                for (_, session) in sessions.drain() {
                    session.close();
                    session_count.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
    }

    for (_, session) in sessions.drain() {
        session.close();
    }
    debug!(room_id = %room_id, "room actor stopped");
}
