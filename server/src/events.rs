/// Realtime frame types exchanged over the WebSocket.
///
/// Every frame is a JSON text message with a `type` discriminator and
/// camelCase fields.
use crate::db::models::AutoDeletePolicy;
use serde::{Deserialize, Serialize};

/// Attachment metadata with an optional base64 payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub original_name: String,
    pub size: u64,
    #[serde(alias = "mimetype")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileInfo>,
    /// Epoch milliseconds, stamped by the server
    pub timestamp: i64,
    pub auto_delete: AutoDeletePolicy,
}

/// Frames sent by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom {
        room_code: String,
        token: String,
        #[serde(default)]
        display_name: String,
    },
    SendMessage {
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        file_info: Option<FileInfo>,
        #[serde(default)]
        client_message_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorReason {
    RoomNotFound,
    InvalidToken,
    AlreadyBound,
    InvalidMessage,
    Internal,
}

/// Frames sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    UserJoined {
        display_name: String,
        member_count: usize,
    },
    UserLeft {
        display_name: String,
        member_count: usize,
    },
    NewMessage(ChatMessage),
    RoomDeleted,
    Error {
        reason: ErrorReason,
    },
}

impl ServerEvent {
    pub fn error(reason: ErrorReason) -> Self {
        ServerEvent::Error { reason }
    }

    /// Serialize to a text frame
    pub fn to_frame(&self) -> String {
        // Every variant is plain data; serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|e| {
            log::error!("Failed to serialize server event: {}", e);
            r#"{"type":"error","reason":"internal"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_join_room() {
        let event: ClientEvent = serde_json::from_value(json!({
            "type": "join-room",
            "roomCode": "ABC123",
            "token": "tok",
            "displayName": "Alice"
        }))
        .expect("Failed to parse");

        assert_eq!(
            event,
            ClientEvent::JoinRoom {
                room_code: "ABC123".to_string(),
                token: "tok".to_string(),
                display_name: "Alice".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_send_message_with_legacy_mimetype() {
        let event: ClientEvent = serde_json::from_value(json!({
            "type": "send-message",
            "fileInfo": {
                "originalName": "cat.png",
                "size": 3,
                "mimetype": "image/png",
                "data": "AAEC"
            }
        }))
        .expect("Failed to parse");

        match event {
            ClientEvent::SendMessage {
                body,
                file_info: Some(info),
                client_message_id,
            } => {
                assert!(body.is_none());
                assert!(client_message_id.is_none());
                assert_eq!(info.mime_type, "image/png");
                assert_eq!(info.data.as_deref(), Some("AAEC"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = serde_json::from_str::<ClientEvent>(r#"{"type":"typing"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_server_event_frames() {
        let frame = ServerEvent::UserJoined {
            display_name: "Bob".to_string(),
            member_count: 2,
        }
        .to_frame();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"type": "user-joined", "displayName": "Bob", "memberCount": 2}));

        let value: serde_json::Value =
            serde_json::from_str(&ServerEvent::RoomDeleted.to_frame()).unwrap();
        assert_eq!(value, json!({"type": "room-deleted"}));

        let value: serde_json::Value =
            serde_json::from_str(&ServerEvent::error(ErrorReason::AlreadyBound).to_frame()).unwrap();
        assert_eq!(value, json!({"type": "error", "reason": "already-bound"}));
    }

    #[test]
    fn test_new_message_frame_is_flat() {
        let frame = ServerEvent::NewMessage(ChatMessage {
            id: "m1".to_string(),
            author: "Alice".to_string(),
            body: Some("hi".to_string()),
            file_info: None,
            timestamp: 1_000,
            auto_delete: AutoDeletePolicy::OneMinute,
        })
        .to_frame();

        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "new-message",
                "id": "m1",
                "author": "Alice",
                "body": "hi",
                "timestamp": 1000,
                "autoDelete": "1m"
            })
        );
    }
}
