// Shared store key layout. Every instance must agree on these names.

use uuid::Uuid;

pub const ACTIVE_ROOMS: &str = "live:active_rooms";
pub const ALL_ROOMS: &str = "live:rooms:all";

pub fn room(room_id: &str) -> String {
    format!("live:room:{room_id}")
}

pub fn room_users(room_id: &str) -> String {
    format!("live:room:{room_id}:users")
}

pub fn room_roles(room_id: &str) -> String {
    format!("live:room:{room_id}:roles")
}

pub fn room_chat(room_id: &str) -> String {
    format!("live:room:{room_id}:chat")
}

pub fn current_room(user_id: Uuid) -> String {
    format!("live:user:{user_id}:current_room")
}

/// The room a creator currently owns, independent of where they are watching.
pub fn owned_room(user_id: Uuid) -> String {
    format!("live:user:{user_id}:owned_room")
}

/// Every key owned by one room, for the close batch.
pub fn room_keys(room_id: &str) -> Vec<String> {
    vec![room(room_id), room_users(room_id), room_roles(room_id), room_chat(room_id)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_keys_share_the_room_prefix() {
        let keys = room_keys("room_1a2b3c4d");
        assert_eq!(
            keys,
            vec![
                "live:room:room_1a2b3c4d",
                "live:room:room_1a2b3c4d:users",
                "live:room:room_1a2b3c4d:roles",
                "live:room:room_1a2b3c4d:chat",
            ]
        );
        assert_eq!(current_room(Uuid::nil()), format!("live:user:{}:current_room", Uuid::nil()));
        assert_eq!(owned_room(Uuid::nil()), format!("live:user:{}:owned_room", Uuid::nil()));
    }
}
