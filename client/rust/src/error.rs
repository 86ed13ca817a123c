/// Error types for the tempchat client.
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// The server rejected a request; `kind` is its machine-readable error kind
    #[error("{message} ({kind})")]
    Api { kind: String, message: String },

    #[error("Server communication error: {0}")]
    ServerError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Room error: {0}")]
    RoomError(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid join link: {0}")]
    InvalidJoinUrl(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Database error: {0}")]
    DbError(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ClientError {
    /// The server's error kind, if this came from an error response
    pub fn api_kind(&self) -> Option<&str> {
        match self {
            ClientError::Api { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// True when the room no longer exists on the server
    pub fn is_not_found(&self) -> bool {
        self.api_kind() == Some("not_found")
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocketError(err.to_string())
    }
}

impl<T> From<futures::channel::mpsc::TrySendError<T>> for ClientError {
    fn from(err: futures::channel::mpsc::TrySendError<T>) -> Self {
        ClientError::WebSocketError(format!("Connection closed: {}", err.into_send_error()))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
