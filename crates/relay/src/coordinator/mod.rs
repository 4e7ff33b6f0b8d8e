// Distributed room coordinator.
//
// Room existence, lifecycle, membership and roles live in the shared store so
// every relay instance sees the same rooms. Each mutation is a single atomic
// store command; no instance-local lock guards this state.

pub mod keys;
pub(crate) mod record;


use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use liveroom_common::{
    protocol::live::{MessageKind, CHAT_HISTORY_LIMIT},
    types::{ChatRecord, RoomDescriptor, RoomRole, RoomStatus},
};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    broadcast::RoomBroadcaster,
    store::SharedStore,
    sync::SessionSyncer,
    validation::{normalize_description, normalize_title},
};

use self::record::{
    decode_room, encode_new_room, unix, FIELD_ENDED_AT, FIELD_PEAK_VIEWERS, FIELD_STARTED_AT,
    FIELD_STATUS, FIELD_UPDATED_AT, FIELD_VIEWER_COUNT,
};

pub const DEFAULT_ACTIVE_LIMIT: usize = 20;
pub const DEFAULT_ALL_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 100;
const ROOM_ID_ATTEMPTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("{0}")]
    Validation(String),
    #[error("room {0} not found")]
    RoomNotFound(String),
    #[error("user is not a member of room {0}")]
    NotMember(String),
    #[error("only the room creator can {action}")]
    NotCreator { action: &'static str },
    #[error("{message}")]
    StateConflict { message: String, current: Option<RoomStatus> },
    #[error("shared room state unavailable: {0}")]
    Store(#[from] anyhow::Error),
    #[error("durable session sync failed: {0}")]
    Durable(anyhow::Error),
}

impl RoomError {
    fn conflict(message: impl Into<String>, current: Option<RoomStatus>) -> Self {
        Self::StateConflict { message: message.into(), current }
    }
}

pub type RoomResult<T> = Result<T, RoomError>;

/// Outcome of a join, so callers can tell a fresh join from a repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub role: RoomRole,
    pub joined: bool,
}

#[derive(Clone)]
pub struct RoomCoordinator {
    store: Arc<dyn SharedStore>,
    broadcaster: Arc<dyn RoomBroadcaster>,
    syncer: Arc<SessionSyncer>,
    max_viewers: i64,
}

impl RoomCoordinator {
    pub fn new(
        store: Arc<dyn SharedStore>,
        broadcaster: Arc<dyn RoomBroadcaster>,
        syncer: Arc<SessionSyncer>,
        max_viewers: i64,
    ) -> Self {
        Self { store, broadcaster, syncer, max_viewers: max_viewers.max(1) }
    }

    pub async fn create_room(
        &self,
        creator_id: Uuid,
        title: &str,
        description: Option<&str>,
    ) -> RoomResult<RoomDescriptor> {
        let title = normalize_title(title).map_err(RoomError::Validation)?;
        let description = normalize_description(description).map_err(RoomError::Validation)?;

        self.ensure_no_other_active_room(creator_id, None).await?;

        let pointer_key = keys::current_room(creator_id);
        if let Some(previous_id) = self.store.get(&pointer_key).await? {
            // A stale pointer to a deleted room needs no leave.
            if self.store.exists(&keys::room(&previous_id)).await? {
                self.leave_room(&previous_id, creator_id).await?;
            }
        }

        let room_id = self.allocate_room_id().await?;
        let stream_key = format!("stream_{}", &Uuid::new_v4().simple().to_string()[..12]);
        let now = Utc::now();
        let room = RoomDescriptor {
            room_id: room_id.clone(),
            title,
            description,
            creator_id,
            status: RoomStatus::Created,
            stream_key: Some(stream_key.clone()),
            viewer_count: 0,
            max_viewers: self.max_viewers,
            started_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
        };

        let creator = creator_id.to_string();
        self.store.hash_set(&keys::room(&room_id), &encode_new_room(&room, &stream_key)).await?;
        self.store.set_add(&keys::room_users(&room_id), &creator).await?;
        self.store
            .hash_set(&keys::room_roles(&room_id), &[(creator.as_str(), RoomRole::Creator.to_string())])
            .await?;
        self.store.set(&pointer_key, &room_id).await?;
        self.store.set(&keys::owned_room(creator_id), &room_id).await?;
        self.store.sorted_add(keys::ACTIVE_ROOMS, &room_id, now.timestamp()).await?;
        self.store.sorted_add(keys::ALL_ROOMS, &room_id, now.timestamp()).await?;

        info!(room_id = %room_id, creator_id = %creator_id, "room created");
        Ok(room)
    }

    pub async fn get_room(&self, room_id: &str) -> RoomResult<RoomDescriptor> {
        self.load_room(room_id).await?.ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))
    }

    pub async fn join_room(&self, room_id: &str, user_id: Uuid) -> RoomResult<JoinOutcome> {
        let room = self.get_room(room_id).await?;
        if room.status == RoomStatus::Cancelled {
            return Err(RoomError::conflict("room has been cancelled", Some(room.status)));
        }

        let member = user_id.to_string();
        let users_key = keys::room_users(room_id);
        let role = RoomRole::for_member(room.creator_id, user_id);
        if self.store.set_contains(&users_key, &member).await? {
            return Ok(JoinOutcome { role, joined: false });
        }

        if !self.store.set_add(&users_key, &member).await? {
            // A concurrent join on another instance won.
            return Ok(JoinOutcome { role, joined: false });
        }

        if role == RoomRole::Viewer {
            let room_key = keys::room(room_id);
            let count = self.store.hash_increment(&room_key, FIELD_VIEWER_COUNT, 1).await?;
            if count > room.max_viewers {
                self.store.set_remove(&users_key, &member).await?;
                self.store.hash_increment(&room_key, FIELD_VIEWER_COUNT, -1).await?;
                return Err(RoomError::conflict(
                    format!("room is full ({} viewers)", room.max_viewers),
                    Some(room.status),
                ));
            }
            self.store.hash_max(&room_key, FIELD_PEAK_VIEWERS, count).await?;
        }

        // The previous room is only left once this join can no longer fail on capacity.
        let pointer_key = keys::current_room(user_id);
        if let Some(previous_id) = self.store.get(&pointer_key).await? {
            if previous_id != room_id {
                if let Err(error) = self.leave_room(&previous_id, user_id).await {
                    warn!(room_id = %previous_id, user_id = %user_id, error = %error, "failed to leave previous room");
                }
            }
        }

        self.store
            .hash_set(&keys::room_roles(room_id), &[(member.as_str(), role.to_string())])
            .await?;
        self.store.set(&pointer_key, room_id).await?;

        info!(room_id, user_id = %user_id, role = role.as_str(), "user joined room");
        Ok(JoinOutcome { role, joined: true })
    }

    /// Returns whether a membership was removed.
    pub async fn leave_room(&self, room_id: &str, user_id: Uuid) -> RoomResult<bool> {
        let member = user_id.to_string();
        let roles_key = keys::room_roles(room_id);
        let role = self.store.hash_get(&roles_key, &member).await?;

        if !self.store.set_remove(&keys::room_users(room_id), &member).await? {
            return Ok(false);
        }
        self.store.hash_delete(&roles_key, &[member.as_str()]).await?;

        let was_viewer = match role.as_deref().map(str::parse::<RoomRole>) {
            Some(Ok(role)) => role == RoomRole::Viewer,
            _ => self.load_room(room_id).await?.is_some_and(|room| room.creator_id != user_id),
        };
        if was_viewer && self.store.exists(&keys::room(room_id)).await? {
            self.store.hash_increment(&keys::room(room_id), FIELD_VIEWER_COUNT, -1).await?;
        }

        self.store.delete_if_equals(&keys::current_room(user_id), room_id).await?;

        info!(room_id, user_id = %user_id, "user left room");
        Ok(true)
    }

    pub async fn start_live(&self, room_id: &str, user_id: Uuid) -> RoomResult<RoomDescriptor> {
        let room = self.creator_room(room_id, user_id, "start the live stream").await?;
        if !room.status.can_start() {
            return Err(RoomError::conflict(
                format!("cannot start a room that is {}", room.status),
                Some(room.status),
            ));
        }
        self.ensure_no_other_active_room(user_id, Some(room_id)).await?;

        let now = Utc::now();
        let room_key = keys::room(room_id);
        self.store
            .hash_set(
                &room_key,
                &[
                    (FIELD_STATUS, RoomStatus::Live.to_string()),
                    (FIELD_STARTED_AT, unix(now)),
                    (FIELD_UPDATED_AT, unix(now)),
                ],
            )
            .await?;
        if room.ended_at.is_some() {
            self.store.hash_delete(&room_key, &[FIELD_ENDED_AT]).await?;
        }
        self.store.sorted_add(keys::ACTIVE_ROOMS, room_id, now.timestamp()).await?;
        self.store.set(&keys::owned_room(user_id), room_id).await?;

        self.broadcaster.broadcast_room_update(
            room_id,
            MessageKind::LiveStarted,
            json!({ "message": "live stream started", "room_id": room_id, "status": "live" }),
        );
        self.spawn_sync(room_id);

        info!(room_id, user_id = %user_id, "live stream started");
        Ok(RoomDescriptor {
            status: RoomStatus::Live,
            started_at: Some(now),
            ended_at: None,
            updated_at: now,
            ..room
        })
    }

    pub async fn end_live(&self, room_id: &str, user_id: Uuid) -> RoomResult<RoomDescriptor> {
        let room = self.creator_room(room_id, user_id, "end the live stream").await?;
        let ended = self.end_live_unchecked(room).await?;
        self.spawn_sync(room_id);
        Ok(ended)
    }

    async fn end_live_unchecked(&self, room: RoomDescriptor) -> RoomResult<RoomDescriptor> {
        if room.status != RoomStatus::Live {
            return Err(RoomError::conflict(
                format!("cannot end a room that is {}", room.status),
                Some(room.status),
            ));
        }

        let now = Utc::now();
        self.store
            .hash_set(
                &keys::room(&room.room_id),
                &[
                    (FIELD_STATUS, RoomStatus::Ended.to_string()),
                    (FIELD_ENDED_AT, unix(now)),
                    (FIELD_UPDATED_AT, unix(now)),
                ],
            )
            .await?;
        self.store.sorted_remove(keys::ACTIVE_ROOMS, &room.room_id).await?;

        self.broadcaster.broadcast_room_update(
            &room.room_id,
            MessageKind::LiveEnded,
            json!({ "message": "live stream ended", "room_id": room.room_id, "status": "ended" }),
        );

        info!(room_id = %room.room_id, "live stream ended");
        Ok(RoomDescriptor {
            status: RoomStatus::Ended,
            ended_at: Some(now),
            updated_at: now,
            ..room
        })
    }

    /// Ends the stream if live, persists the final numbers, tells attached
    /// sessions, then deletes every key of the room.
    pub async fn close_room(&self, room_id: &str, user_id: Uuid) -> RoomResult<()> {
        let room = self.creator_room(room_id, user_id, "close the room").await?;
        if room.status == RoomStatus::Live {
            self.end_live_unchecked(room.clone()).await?;
        }

        self.syncer.sync_room(room_id).await.map_err(RoomError::Durable)?;

        self.broadcaster.broadcast_room_update(
            room_id,
            MessageKind::RoomClosed,
            json!({ "message": "room closed", "room_id": room_id }),
        );

        let mut members = self.store.set_members(&keys::room_users(room_id)).await?;
        members.push(room.creator_id.to_string());
        for member in members {
            let Ok(member_id) = Uuid::parse_str(&member) else {
                warn!(room_id, member = %member, "skipping malformed member id");
                continue;
            };
            self.store.delete_if_equals(&keys::current_room(member_id), room_id).await?;
        }
        self.store.delete_if_equals(&keys::owned_room(room.creator_id), room_id).await?;

        self.store
            .delete_batch(
                &keys::room_keys(room_id),
                &[(keys::ACTIVE_ROOMS, room_id), (keys::ALL_ROOMS, room_id)],
            )
            .await?;

        info!(room_id, user_id = %user_id, "room closed");
        Ok(())
    }

    pub async fn get_user_role(&self, room_id: &str, user_id: Uuid) -> RoomResult<RoomRole> {
        let room = self.get_room(room_id).await?;
        let member = user_id.to_string();
        if !self.store.set_contains(&keys::room_users(room_id), &member).await? {
            return Err(RoomError::NotMember(room_id.to_string()));
        }

        match self.store.hash_get(&keys::room_roles(room_id), &member).await? {
            Some(raw) => match raw.parse::<RoomRole>() {
                Ok(role) => Ok(role),
                Err(error) => {
                    warn!(room_id, user_id = %user_id, error = %error, "unreadable role entry");
                    Ok(RoomRole::for_member(room.creator_id, user_id))
                }
            },
            None => Ok(RoomRole::for_member(room.creator_id, user_id)),
        }
    }

    pub async fn is_member(&self, room_id: &str, user_id: Uuid) -> RoomResult<bool> {
        Ok(self.store.set_contains(&keys::room_users(room_id), &user_id.to_string()).await?)
    }

    pub async fn get_active_rooms(&self, limit: Option<usize>) -> RoomResult<Vec<RoomDescriptor>> {
        self.list_rooms(keys::ACTIVE_ROOMS, clamp_limit(limit, DEFAULT_ACTIVE_LIMIT)).await
    }

    pub async fn get_all_rooms(&self, limit: Option<usize>) -> RoomResult<Vec<RoomDescriptor>> {
        self.list_rooms(keys::ALL_ROOMS, clamp_limit(limit, DEFAULT_ALL_LIMIT)).await
    }

    pub async fn active_room_ids(&self) -> RoomResult<Vec<String>> {
        Ok(self.store.sorted_members(keys::ACTIVE_ROOMS).await?)
    }

    pub async fn append_chat(&self, room_id: &str, record: &ChatRecord) -> RoomResult<()> {
        let encoded = serde_json::to_string(record)
            .with_context(|| format!("failed to encode chat record for room {room_id}"))?;
        self.store.list_push_capped(&keys::room_chat(room_id), &encoded, CHAT_HISTORY_LIMIT).await?;
        Ok(())
    }

    /// Newest first. Entries that fail to decode are skipped.
    pub async fn recent_chat(&self, room_id: &str, limit: Option<usize>) -> RoomResult<Vec<ChatRecord>> {
        let limit = limit.unwrap_or(CHAT_HISTORY_LIMIT).clamp(1, CHAT_HISTORY_LIMIT);
        let raw = self.store.list_range(&keys::room_chat(room_id), limit).await?;
        Ok(raw
            .into_iter()
            .filter_map(|entry| match serde_json::from_str::<ChatRecord>(&entry) {
                Ok(record) => Some(record),
                Err(error) => {
                    warn!(room_id, error = %error, "skipping undecodable chat entry");
                    None
                }
            })
            .collect())
    }

    pub async fn chat_length(&self, room_id: &str) -> RoomResult<i64> {
        Ok(self.store.list_len(&keys::room_chat(room_id)).await?)
    }

    /// Fails when `creator_id` owns a created or live room other than `except`.
    async fn ensure_no_other_active_room(
        &self,
        creator_id: Uuid,
        except: Option<&str>,
    ) -> RoomResult<()> {
        let Some(owned_id) = self.store.get(&keys::owned_room(creator_id)).await? else {
            return Ok(());
        };
        if except == Some(owned_id.as_str()) {
            return Ok(());
        }
        match self.load_room(&owned_id).await? {
            Some(owned) if owned.creator_id == creator_id && owned.status.is_active() => {
                Err(RoomError::conflict(
                    format!("you already have an active room ({owned_id}); close or end it first"),
                    Some(owned.status),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn load_room(&self, room_id: &str) -> RoomResult<Option<RoomDescriptor>> {
        let fields = self.store.hash_get_all(&keys::room(room_id)).await?;
        Ok(decode_room(room_id, &fields)?)
    }

    async fn creator_room(
        &self,
        room_id: &str,
        user_id: Uuid,
        action: &'static str,
    ) -> RoomResult<RoomDescriptor> {
        let room = self.get_room(room_id).await?;
        if room.creator_id != user_id {
            return Err(RoomError::NotCreator { action });
        }
        Ok(room)
    }

    async fn list_rooms(&self, index: &str, limit: usize) -> RoomResult<Vec<RoomDescriptor>> {
        let ids = self.store.sorted_range_desc(index, limit).await?;
        let mut rooms = Vec::with_capacity(ids.len());
        for room_id in ids {
            if let Some(room) = self.load_room(&room_id).await? {
                rooms.push(room);
            }
        }
        Ok(rooms)
    }

    async fn allocate_room_id(&self) -> RoomResult<String> {
        for _ in 0..ROOM_ID_ATTEMPTS {
            let candidate = format!("room_{}", &Uuid::new_v4().simple().to_string()[..8]);
            if !self.store.exists(&keys::room(&candidate)).await? {
                return Ok(candidate);
            }
        }
        Err(RoomError::Store(anyhow::anyhow!(
            "could not allocate a free room id after {ROOM_ID_ATTEMPTS} attempts"
        )))
    }

    fn spawn_sync(&self, room_id: &str) {
        let syncer = Arc::clone(&self.syncer);
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            if let Err(error) = syncer.sync_room(&room_id).await {
                warn!(room_id = %room_id, error = ?error, "out-of-band room sync failed");
            }
        });
    }
}

fn clamp_limit(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).clamp(1, MAX_LIST_LIMIT)
}
