// Durability sync: copies live room numbers from the shared store into the
// durable session table on a low-frequency schedule.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use liveroom_common::types::{RoomDescriptor, RoomStatus};
use tokio::{task::JoinHandle, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    broadcast::BroadcastRegistry,
    coordinator::{
        keys,
        record::{decode_room, running_peak},
    },
    db::sessions::{DurableSessionRecord, DurableSessionStore},
    metrics,
    store::SharedStore,
};

/// Summary of one scheduled pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncPassReport {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct SessionSyncer {
    store: Arc<dyn SharedStore>,
    sessions: DurableSessionStore,
}

impl SessionSyncer {
    pub fn new(store: Arc<dyn SharedStore>, sessions: DurableSessionStore) -> Self {
        Self { store, sessions }
    }

    pub fn sessions(&self) -> &DurableSessionStore {
        &self.sessions
    }

    /// Upserts the durable record for one room. Returns false when the room
    /// no longer exists in the shared store.
    pub async fn sync_room(&self, room_id: &str) -> Result<bool> {
        let outcome = self
            .sync_room_inner(room_id)
            .instrument(info_span!("relay.sync.room", room_id = %room_id))
            .await;
        metrics::record_room_sync(outcome.is_ok());
        outcome
    }

    async fn sync_room_inner(&self, room_id: &str) -> Result<bool> {
        let fields = self
            .store
            .hash_get_all(&keys::room(room_id))
            .await
            .context("failed to read room for sync")?;
        let Some(room) = decode_room(room_id, &fields)? else {
            debug!(room_id, "room vanished before sync");
            return Ok(false);
        };

        let total_messages = self
            .store
            .list_len(&keys::room_chat(room_id))
            .await
            .context("failed to read chat length for sync")?;
        let previous_peak = self.sessions.peak_viewers(room_id).await?.max(running_peak(&fields)?);

        let record = durable_record(&room, previous_peak, total_messages, Utc::now());
        self.sessions.upsert(&record).await?;
        debug!(
            room_id,
            status = room.status.as_str(),
            peak_viewers = record.peak_viewers,
            duration_secs = record.duration_secs,
            "room synced"
        );
        Ok(true)
    }

    /// Syncs every active room, each on its own task. One failing room does
    /// not stop the others.
    pub async fn sync_active_rooms(self: &Arc<Self>) -> Result<SyncPassReport> {
        let room_ids = self
            .store
            .sorted_members(keys::ACTIVE_ROOMS)
            .await
            .context("failed to list active rooms for sync")?;
        if room_ids.is_empty() {
            debug!("no active rooms to sync");
            return Ok(SyncPassReport::default());
        }

        let mut tasks = JoinSet::new();
        for room_id in room_ids {
            let syncer = Arc::clone(self);
            tasks.spawn(async move {
                let outcome = syncer.sync_room(&room_id).await;
                (room_id, outcome)
            });
        }

        let mut report = SyncPassReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(true))) => report.synced += 1,
                Ok((_, Ok(false))) => report.skipped += 1,
                Ok((room_id, Err(error))) => {
                    report.failed += 1;
                    warn!(room_id = %room_id, error = ?error, "room sync failed");
                }
                Err(join_error) => {
                    report.failed += 1;
                    warn!(?join_error, "room sync task panicked");
                }
            }
        }

        info!(synced = report.synced, skipped = report.skipped, failed = report.failed, "sync pass finished");
        Ok(report)
    }
}

/// Runs a sync pass every `interval` until `shutdown` fires. Idle local
/// broadcast rooms are reaped on the same schedule.
pub fn spawn_periodic_sync(
    syncer: Arc<SessionSyncer>,
    registry: Option<Arc<BroadcastRegistry>>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.reset(); // first pass after one full interval

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(error) = syncer.sync_active_rooms().await {
                warn!(error = ?error, "sync pass aborted; retrying next interval");
            }

            if let Some(registry) = &registry {
                registry.reap_idle();
                let stats = registry.stats();
                metrics::set_hub_gauges(stats.rooms, stats.sessions);
            }
        }

        info!("durability sync task stopped");
    })
}

pub(crate) fn durable_record(
    room: &RoomDescriptor,
    previous_peak: i64,
    total_messages: i64,
    now: DateTime<Utc>,
) -> DurableSessionRecord {
    DurableSessionRecord {
        room_id: room.room_id.clone(),
        creator_id: room.creator_id,
        title: room.title.clone(),
        description: room.description.clone(),
        stream_key: room.stream_key.clone().unwrap_or_default(),
        status: room.status,
        peak_viewers: previous_peak.max(room.viewer_count),
        total_viewers: room.viewer_count,
        total_messages: total_messages.max(0),
        duration_secs: duration_secs(room, now),
        started_at: room.started_at,
        ended_at: room.ended_at,
    }
}

fn duration_secs(room: &RoomDescriptor, now: DateTime<Utc>) -> i64 {
    let Some(started_at) = room.started_at else {
        return 0;
    };
    let until = if room.status == RoomStatus::Live {
        now
    } else {
        room.ended_at.unwrap_or(room.updated_at)
    };
    until.signed_duration_since(started_at).num_seconds().max(0)
}
