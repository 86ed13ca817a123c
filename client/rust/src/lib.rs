/// Tempchat Client Library
/// Room API access, realtime sessions and the local expiring message ledger

pub mod api;
pub mod cli;
pub mod error;
pub mod expiry;
pub mod ledger;
pub mod models;
pub mod session;
pub mod storage;
pub mod websocket;

pub use error::{ClientError, Result};
pub use ledger::MessageLedger;
pub use session::RoomSession;
