use axum::extract::ws::Utf8Bytes;
use liveroom_common::protocol::live::LiveMessage;

pub fn decode_message(raw: &str) -> Result<LiveMessage, serde_json::Error> {
    serde_json::from_str::<LiveMessage>(raw)
}

pub fn encode_message(message: &LiveMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// Encodes once so the same frame can be queued to every session in a room.
pub fn encode_frame(message: &LiveMessage) -> Result<Utf8Bytes, serde_json::Error> {
    encode_message(message).map(Utf8Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::{decode_message, encode_frame};
    use liveroom_common::protocol::live::{LiveMessage, MessageKind};
    use serde_json::json;

    #[test]
    fn decodes_minimal_client_frames() {
        let ping = decode_message(r#"{"type":"ping"}"#).expect("ping should decode");
        assert_eq!(ping.kind, MessageKind::Ping);
        assert_eq!(ping.timestamp, 0);

        let chat = decode_message(r#"{"type":"chat","content":"hi"}"#).expect("chat should decode");
        assert_eq!(chat.kind, MessageKind::Chat);
        assert_eq!(chat.content.as_deref(), Some("hi"));
    }

    #[test]
    fn unknown_types_decode_as_unknown() {
        let message = decode_message(r#"{"type":"dance"}"#).expect("unknown type should decode");
        assert_eq!(message.kind, MessageKind::Unknown);
    }

    #[test]
    fn rejects_frames_without_type() {
        assert!(decode_message(r#"{"content":"hi"}"#).is_err());
        assert!(decode_message("not json").is_err());
    }

    #[test]
    fn encoded_frames_are_json_text() {
        let message =
            LiveMessage::system(MessageKind::LiveStarted, "room_abc", json!({"status": "live"}));
        let frame = encode_frame(&message).expect("frame should encode");
        let value: serde_json::Value =
            serde_json::from_str(frame.as_str()).expect("frame should be json");

        assert_eq!(value["type"], "live_started");
        assert_eq!(value["data"]["status"], "live");
    }
}
