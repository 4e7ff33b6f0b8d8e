use chrono::{TimeZone, Utc};
use liveroom_common::types::{ChatRecord, RoomDescriptor, RoomRole, RoomStatus};
use serde_json::Value;
use uuid::Uuid;

fn sample_room(creator_id: Uuid) -> RoomDescriptor {
    let created_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid timestamp");
    RoomDescriptor {
        room_id: "room_1a2b3c4d".to_string(),
        title: "Friday night set".to_string(),
        description: String::new(),
        creator_id,
        status: RoomStatus::Live,
        stream_key: Some("sk_secret".to_string()),
        viewer_count: 12,
        max_viewers: 1000,
        started_at: Some(created_at),
        ended_at: None,
        created_at,
        updated_at: created_at,
    }
}

fn object_keys(value: &Value) -> Vec<String> {
    let mut keys =
        value.as_object().expect("value should be an object").keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys
}

#[test]
fn room_descriptor_wire_shape() {
    let creator_id = Uuid::new_v4();
    let encoded = serde_json::to_value(sample_room(creator_id)).expect("room should serialize");

    assert_eq!(encoded["status"], "live");
    assert_eq!(encoded["stream_key"], "sk_secret");
    assert_eq!(
        object_keys(&encoded),
        [
            "created_at",
            "creator_id",
            "description",
            "ended_at",
            "max_viewers",
            "room_id",
            "started_at",
            "status",
            "stream_key",
            "title",
            "updated_at",
            "viewer_count",
        ]
    );
}

#[test]
fn viewers_never_see_the_stream_key_on_the_wire() {
    let room = sample_room(Uuid::new_v4()).visible_to(Uuid::new_v4());
    let encoded = serde_json::to_value(room).expect("room should serialize");

    assert!(encoded.get("stream_key").is_none());
}

#[test]
fn chat_records_use_snake_case_roles() {
    let record = ChatRecord {
        user_id: Uuid::nil(),
        username: "ana".to_string(),
        role: RoomRole::Creator,
        content: "welcome in".to_string(),
        timestamp: 1_772_366_400,
    };
    let encoded = serde_json::to_value(&record).expect("record should serialize");

    assert_eq!(encoded["role"], "creator");
    let decoded: ChatRecord = serde_json::from_value(encoded).expect("record should decode");
    assert_eq!(decoded, record);
}
