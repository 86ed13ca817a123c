//! Data models and DTOs for the tempchat client

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Time-to-live applied to every message in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AutoDeletePolicy {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[default]
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "24h")]
    OneDay,
}

impl AutoDeletePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoDeletePolicy::OneMinute => "1m",
            AutoDeletePolicy::ThirtyMinutes => "30m",
            AutoDeletePolicy::OneHour => "1h",
            AutoDeletePolicy::OneDay => "24h",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(AutoDeletePolicy::OneMinute),
            "30m" => Some(AutoDeletePolicy::ThirtyMinutes),
            "1h" => Some(AutoDeletePolicy::OneHour),
            "24h" => Some(AutoDeletePolicy::OneDay),
            _ => None,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            AutoDeletePolicy::OneMinute => Duration::minutes(1),
            AutoDeletePolicy::ThirtyMinutes => Duration::minutes(30),
            AutoDeletePolicy::OneHour => Duration::hours(1),
            AutoDeletePolicy::OneDay => Duration::hours(24),
        }
    }
}

impl std::str::FromStr for AutoDeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AutoDeletePolicy::parse(s)
            .ok_or_else(|| format!("Unknown auto-delete policy '{}' (use 1m, 30m, 1h or 24h)", s))
    }
}

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

/// A message as broadcast by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileInfo>,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub auto_delete: AutoDeletePolicy,
}

impl ChatMessage {
    /// Epoch milliseconds after which the message is gone
    pub fn expires_at(&self) -> i64 {
        self.timestamp + self.auto_delete.duration().num_milliseconds()
    }
}

/// Frames sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom {
        room_code: String,
        token: String,
        display_name: String,
    },
    SendMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_info: Option<FileInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_message_id: Option<String>,
    },
}

/// Frames received from the server
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
        reason: String,
    },
}

// REST DTOs
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub device_id: String,
    pub auto_delete: AutoDeletePolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_code: String,
    pub password: String,
    pub token: String,
    pub auto_delete: AutoDeletePolicy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room_code: String,
    pub password: String,
    pub device_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomResponse {
    pub token: String,
    pub room_code: String,
    pub auto_delete: AutoDeletePolicy,
    pub is_owner: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_code: String,
    pub auto_delete: AutoDeletePolicy,
    pub member_count: i64,
    pub is_owner: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCode {
    /// PNG data URL
    pub qr_code: String,
    pub url: String,
    pub expires_at: i64,
    /// Milliseconds left on the artifact
    pub expires_in: i64,
}

/// Error body returned by the server
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(default)]
    pub message: String,
}

/// A room this device has joined, as cached locally
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRoom {
    pub room_code: String,
    pub token: String,
    pub auto_delete: AutoDeletePolicy,
    pub is_owner: bool,
    /// Epoch milliseconds
    pub joined_at: i64,
}

/// Command types for the in-room prompt
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Message(String),
    Attach(String),
    Save { message_id: String, path: String },
    Info,
    Password,
    Qr,
    Delete,
    Leave,
}

impl Command {
    /// Parse a command string
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();

        match input {
            "/quit" | "/exit" | "/leave" => return Ok(Command::Leave),
            "/info" => return Ok(Command::Info),
            "/password" => return Ok(Command::Password),
            "/qr" => return Ok(Command::Qr),
            "/delete" => return Ok(Command::Delete),
            _ => {}
        }

        if let Some(path) = input.strip_prefix("/attach") {
            let path = path.trim();
            if path.is_empty() {
                return Err("Usage: /attach <path>".to_string());
            }
            return Ok(Command::Attach(path.to_string()));
        }

        if let Some(args) = input.strip_prefix("/save") {
            let mut parts = args.split_whitespace();
            return match (parts.next(), parts.next()) {
                (Some(message_id), Some(path)) => Ok(Command::Save {
                    message_id: message_id.to_string(),
                    path: path.to_string(),
                }),
                _ => Err("Usage: /save <message-id> <path>".to_string()),
            };
        }

        if input.starts_with('/') {
            return Err(format!("Unknown command: {}", input));
        }

        Ok(Command::Message(input.to_string()))
    }
}
