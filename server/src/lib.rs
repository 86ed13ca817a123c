/// Tempchat server library
/// Exposes the room store, services and HTTP server for the binary and tests
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod handlers;
pub mod qr;
pub mod rooms;
pub mod server;
pub mod tokens;
