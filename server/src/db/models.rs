/// Data models for room records and the REST request/response DTOs.
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Time-to-live applied to every message sent in a room
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

/// Rendered QR join link. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrArtifact {
    pub image: String,
    pub url: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_code: String,
    pub owner_token: String,
    pub owner_expires_at: i64,
    pub password: String,
    pub auto_delete: AutoDeletePolicy,
    pub device_id: String,
    pub created_at: i64,
    pub qr: Option<QrArtifact>,
}

/// Everything needed to insert a room together with its first member
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub room_code: String,
    pub owner_token: String,
    pub owner_expires_at: i64,
    pub password: String,
    pub auto_delete: AutoDeletePolicy,
    pub device_id: String,
    pub created_at: i64,
}

// Request/Response DTOs
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    #[serde(default, alias = "deviceToken")]
    pub device_id: String,
    #[serde(default)]
    pub auto_delete: Option<AutoDeletePolicy>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_code: String,
    pub password: String,
    pub token: String,
    pub auto_delete: AutoDeletePolicy,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    #[serde(default)]
    pub room_code: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, alias = "deviceToken")]
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomResponse {
    pub token: String,
    pub room_code: String,
    pub auto_delete: AutoDeletePolicy,
    pub is_owner: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfoResponse {
    pub room_code: String,
    pub auto_delete: AutoDeletePolicy,
    pub member_count: i64,
    pub is_owner: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PasswordResponse {
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrResponse {
    pub qr_code: String,
    pub url: String,
    pub expires_at: i64,
    pub expires_in: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRoomResponse {
    pub success: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}
