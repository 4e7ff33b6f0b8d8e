// Room hash encoding. Timestamps are stored as unix seconds; an empty or
// missing field means "unset".

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use liveroom_common::types::{RoomDescriptor, RoomStatus};
use uuid::Uuid;

pub(crate) const FIELD_TITLE: &str = "title";
pub(crate) const FIELD_DESCRIPTION: &str = "description";
pub(crate) const FIELD_CREATOR_ID: &str = "creator_id";
pub(crate) const FIELD_STATUS: &str = "status";
pub(crate) const FIELD_STREAM_KEY: &str = "stream_key";
pub(crate) const FIELD_VIEWER_COUNT: &str = "viewer_count";
pub(crate) const FIELD_MAX_VIEWERS: &str = "max_viewers";
/// Highest viewer count ever reached; only raised, never lowered.
pub(crate) const FIELD_PEAK_VIEWERS: &str = "peak_viewers";
pub(crate) const FIELD_STARTED_AT: &str = "started_at";
pub(crate) const FIELD_ENDED_AT: &str = "ended_at";
pub(crate) const FIELD_CREATED_AT: &str = "created_at";
pub(crate) const FIELD_UPDATED_AT: &str = "updated_at";

pub(crate) fn unix(at: DateTime<Utc>) -> String {
    at.timestamp().to_string()
}

pub(crate) fn encode_new_room(room: &RoomDescriptor, stream_key: &str) -> Vec<(&'static str, String)> {
    vec![
        (FIELD_TITLE, room.title.clone()),
        (FIELD_DESCRIPTION, room.description.clone()),
        (FIELD_CREATOR_ID, room.creator_id.to_string()),
        (FIELD_STATUS, room.status.as_str().to_string()),
        (FIELD_STREAM_KEY, stream_key.to_string()),
        (FIELD_VIEWER_COUNT, room.viewer_count.to_string()),
        (FIELD_MAX_VIEWERS, room.max_viewers.to_string()),
        (FIELD_PEAK_VIEWERS, "0".to_string()),
        (FIELD_CREATED_AT, unix(room.created_at)),
        (FIELD_UPDATED_AT, unix(room.updated_at)),
    ]
}

/// Decodes a room hash. A hash without `creator_id` is a leftover from a
/// concurrent counter update on a deleted room and reads as absent.
pub(crate) fn decode_room(
    room_id: &str,
    fields: &HashMap<String, String>,
) -> Result<Option<RoomDescriptor>> {
    let Some(creator_id) = fields.get(FIELD_CREATOR_ID).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    let creator_id = Uuid::parse_str(creator_id)
        .with_context(|| format!("room {room_id} has malformed creator_id"))?;
    let status = fields
        .get(FIELD_STATUS)
        .ok_or_else(|| anyhow!("room {room_id} has no status"))?
        .parse::<RoomStatus>()
        .with_context(|| format!("room {room_id} has an unknown status"))?;

    let created_at = timestamp(fields, FIELD_CREATED_AT)?.unwrap_or_else(Utc::now);
    let updated_at = timestamp(fields, FIELD_UPDATED_AT)?.unwrap_or(created_at);

    Ok(Some(RoomDescriptor {
        room_id: room_id.to_string(),
        title: text(fields, FIELD_TITLE),
        description: text(fields, FIELD_DESCRIPTION),
        creator_id,
        status,
        stream_key: fields.get(FIELD_STREAM_KEY).filter(|value| !value.is_empty()).cloned(),
        viewer_count: integer(fields, FIELD_VIEWER_COUNT)?.unwrap_or(0).max(0),
        max_viewers: integer(fields, FIELD_MAX_VIEWERS)?
            .unwrap_or(crate::config::DEFAULT_MAX_VIEWERS),
        started_at: timestamp(fields, FIELD_STARTED_AT)?,
        ended_at: timestamp(fields, FIELD_ENDED_AT)?,
        created_at,
        updated_at,
    }))
}

/// The running peak kept next to the live counter. Zero when unset.
pub(crate) fn running_peak(fields: &HashMap<String, String>) -> Result<i64> {
    Ok(integer(fields, FIELD_PEAK_VIEWERS)?.unwrap_or(0).max(0))
}

fn text(fields: &HashMap<String, String>, field: &str) -> String {
    fields.get(field).cloned().unwrap_or_default()
}

fn integer(fields: &HashMap<String, String>, field: &str) -> Result<Option<i64>> {
    match fields.get(field).map(|value| value.trim()).filter(|value| !value.is_empty()) {
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .with_context(|| format!("field {field} is not an integer: {raw}")),
        None => Ok(None),
    }
}

fn timestamp(fields: &HashMap<String, String>, field: &str) -> Result<Option<DateTime<Utc>>> {
    match integer(fields, field)? {
        Some(seconds) => Utc
            .timestamp_opt(seconds, 0)
            .single()
            .map(Some)
            .ok_or_else(|| anyhow!("field {field} is out of range: {seconds}")),
        None => Ok(None),
    }
}
