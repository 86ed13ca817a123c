/// Error taxonomy for room operations.
/// Every variant maps to a machine-readable kind and an HTTP status.
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoomError {
    #[error("{0}")]
    Validation(String),

    #[error("Password must be exactly 6 digits")]
    InvalidPassword,

    #[error("Room not found")]
    NotFound,

    #[error("Invalid password")]
    InvalidCredentials,

    #[error("Only the room owner can do this")]
    Forbidden,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Maximum {0} rooms per device. Please delete a room first.")]
    QuotaExceeded(i64),

    #[error("Could not allocate a unique room code")]
    CodeSpaceExhausted,

    #[error("Failed to generate QR code: {0}")]
    Qr(String),

    #[error("Token signing failed: {0}")]
    Signing(String),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl RoomError {
    /// Machine-readable error kind carried in every error response
    pub fn kind(&self) -> &'static str {
        match self {
            RoomError::Validation(_) | RoomError::InvalidPassword => "validation_error",
            RoomError::NotFound => "not_found",
            RoomError::InvalidCredentials => "invalid_credentials",
            RoomError::Forbidden => "forbidden",
            RoomError::InvalidToken => "invalid_token",
            RoomError::QuotaExceeded(_) => "quota_exceeded",
            RoomError::CodeSpaceExhausted
            | RoomError::Qr(_)
            | RoomError::Signing(_)
            | RoomError::Db(_) => "internal",
        }
    }

    pub fn is_internal(&self) -> bool {
        self.kind() == "internal"
    }
}

pub type RoomResult<T> = std::result::Result<T, RoomError>;

impl ResponseError for RoomError {
    fn status_code(&self) -> StatusCode {
        match self {
            RoomError::Validation(_) | RoomError::InvalidPassword | RoomError::QuotaExceeded(_) => {
                StatusCode::BAD_REQUEST
            }
            RoomError::InvalidCredentials | RoomError::InvalidToken => StatusCode::UNAUTHORIZED,
            RoomError::Forbidden => StatusCode::FORBIDDEN,
            RoomError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Internal details stay in the log
        let message = if self.is_internal() {
            log::error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": self.kind(),
            "message": message
        }))
    }
}
