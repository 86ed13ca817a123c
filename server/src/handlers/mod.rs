/// HTTP handlers module
/// Provides REST and WebSocket endpoints
pub mod rest;
pub mod websocket;

use crate::error::RoomError;
use actix_web::web;

pub use rest::{create_room, delete_room, get_password, get_qr, get_room, health, join_room};
pub use websocket::{ws_connect, SessionRouter};

/// Default cap on a single WebSocket frame (64 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Server configuration passed to handlers
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_frame_bytes: usize,
    /// Origin used in QR join links; derived from the request when unset
    pub public_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            public_origin: None,
        }
    }
}

/// Malformed JSON bodies are reported as `validation_error`
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| RoomError::Validation(err.to_string()).into())
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| RoomError::Validation(err.to_string()).into())
}
