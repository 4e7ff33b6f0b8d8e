use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use liveroom_common::types::RoomStatus;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Durable summary of one room lifetime, written by the sync task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableSessionRecord {
    pub room_id: String,
    pub creator_id: Uuid,
    pub title: String,
    pub description: String,
    pub stream_key: String,
    pub status: RoomStatus,
    pub peak_viewers: i64,
    pub total_viewers: i64,
    pub total_messages: i64,
    pub duration_secs: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub enum DurableSessionStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<HashMap<String, DurableSessionRecord>>>),
}

impl DurableSessionStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    /// Creates or refreshes the row for `record.room_id`. Peak viewers never
    /// decrease across upserts.
    pub async fn upsert(&self, record: &DurableSessionRecord) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO live_sessions (
                        room_id, creator_id, title, description, stream_key, status,
                        peak_viewers, total_viewers, total_messages, duration_secs,
                        started_at, ended_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    ON CONFLICT (room_id) DO UPDATE SET
                        title = EXCLUDED.title,
                        description = EXCLUDED.description,
                        stream_key = EXCLUDED.stream_key,
                        status = EXCLUDED.status,
                        peak_viewers = GREATEST(live_sessions.peak_viewers, EXCLUDED.peak_viewers),
                        total_viewers = EXCLUDED.total_viewers,
                        total_messages = EXCLUDED.total_messages,
                        duration_secs = EXCLUDED.duration_secs,
                        started_at = EXCLUDED.started_at,
                        ended_at = EXCLUDED.ended_at,
                        updated_at = now()
                    "#,
                )
                .bind(&record.room_id)
                .bind(record.creator_id)
                .bind(&record.title)
                .bind(&record.description)
                .bind(&record.stream_key)
                .bind(record.status.as_str())
                .bind(record.peak_viewers)
                .bind(record.total_viewers)
                .bind(record.total_messages)
                .bind(record.duration_secs)
                .bind(record.started_at)
                .bind(record.ended_at)
                .execute(pool)
                .await
                .with_context(|| format!("failed to upsert live session for {}", record.room_id))?;
                Ok(())
            }
            Self::Memory(records) => {
                let mut records = records.write().await;
                let peak_viewers = records
                    .get(&record.room_id)
                    .map_or(record.peak_viewers, |existing| {
                        existing.peak_viewers.max(record.peak_viewers)
                    });
                records.insert(
                    record.room_id.clone(),
                    DurableSessionRecord { peak_viewers, ..record.clone() },
                );
                Ok(())
            }
        }
    }

    /// Previously recorded peak, or 0 when the room was never synced.
    pub async fn peak_viewers(&self, room_id: &str) -> Result<i64> {
        match self {
            Self::Postgres(pool) => {
                let peak = sqlx::query_scalar::<_, i64>(
                    "SELECT peak_viewers FROM live_sessions WHERE room_id = $1",
                )
                .bind(room_id)
                .fetch_optional(pool)
                .await
                .with_context(|| format!("failed to read peak viewers for {room_id}"))?;
                Ok(peak.unwrap_or(0))
            }
            Self::Memory(records) => {
                Ok(records.read().await.get(room_id).map_or(0, |record| record.peak_viewers))
            }
        }
    }

    pub async fn get(&self, room_id: &str) -> Result<Option<DurableSessionRecord>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<
                    _,
                    (
                        String,
                        Uuid,
                        String,
                        String,
                        String,
                        String,
                        i64,
                        i64,
                        i64,
                        i64,
                        Option<DateTime<Utc>>,
                        Option<DateTime<Utc>>,
                    ),
                >(
                    r#"
                    SELECT room_id, creator_id, title, description, stream_key, status,
                           peak_viewers, total_viewers, total_messages, duration_secs,
                           started_at, ended_at
                    FROM live_sessions
                    WHERE room_id = $1
                    "#,
                )
                .bind(room_id)
                .fetch_optional(pool)
                .await
                .with_context(|| format!("failed to load live session for {room_id}"))?;

                row.map(
                    |(
                        room_id,
                        creator_id,
                        title,
                        description,
                        stream_key,
                        status,
                        peak_viewers,
                        total_viewers,
                        total_messages,
                        duration_secs,
                        started_at,
                        ended_at,
                    )| {
                        let status = status
                            .parse::<RoomStatus>()
                            .with_context(|| format!("invalid status stored for {room_id}"))?;
                        Ok(DurableSessionRecord {
                            room_id,
                            creator_id,
                            title,
                            description,
                            stream_key,
                            status,
                            peak_viewers,
                            total_viewers,
                            total_messages,
                            duration_secs,
                            started_at,
                            ended_at,
                        })
                    },
                )
                .transpose()
            }
            Self::Memory(records) => Ok(records.read().await.get(room_id).cloned()),
        }
    }
}
