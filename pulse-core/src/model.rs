//! Chat and message records shared by the store, the wire protocol and the
//! client feed.
//!
//! Field names serialize in camelCase (`chatId`, `lastMessageAt`, ...) so the
//! JSON matches what subscribers already parse.

use serde::{Deserialize, Serialize};

/// A conversation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: i64,
    pub title: String,
    /// Timestamp (ms since epoch) of the newest message, 0 when empty
    pub last_message_at: i64,
    pub unread_count: u32,
}

impl Chat {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            last_message_at: 0,
            unread_count: 0,
        }
    }
}

/// A single chat message. Immutable once the store has created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    /// Creation time, ms since epoch
    pub ts: i64,
    pub sender: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_json_uses_camel_case() {
        let chat = Chat {
            id: 7,
            title: "Design Review #12".to_string(),
            last_message_at: 1_700_000_000_000,
            unread_count: 3,
        };
        let json = serde_json::to_value(&chat).unwrap();
        assert_eq!(json["lastMessageAt"], 1_700_000_000_000_i64);
        assert_eq!(json["unreadCount"], 3);
        assert!(json.get("last_message_at").is_none());
    }

    #[test]
    fn test_message_parses_from_wire_shape() {
        let raw = r#"{"id":1,"chatId":4,"ts":99,"sender":"Ivy","body":"hi"}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.chat_id, 4);
        assert_eq!(msg.sender, "Ivy");
    }

    #[test]
    fn test_new_chat_is_empty() {
        let chat = Chat::new(1, "Retro Notes #3");
        assert_eq!(chat.last_message_at, 0);
        assert_eq!(chat.unread_count, 0);
    }
}
