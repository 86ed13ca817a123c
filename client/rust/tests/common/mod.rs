//! Common helpers for client integration tests
#![allow(dead_code)]

use tempchat_client::api::RoomApi;
use tempchat_client::ledger::MessageLedger;
use tempchat_client::storage::LocalStore;
use tempfile::TempDir;

/// Spawn an in-memory test server and return its base URL
pub async fn spawn_server() -> String {
    let (server, addr) = tempchat_server::server::create_test_http_server()
        .expect("Failed to create test server");
    tokio::spawn(server);

    // Give server a moment to bind
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    format!("http://{}", addr)
}

pub fn api(base_url: &str) -> RoomApi {
    RoomApi::new(base_url).expect("Failed to build API client")
}

/// One simulated device: its own metadata store and ledger on disk
pub struct Device {
    pub store: LocalStore,
    pub ledger: MessageLedger,
    pub temp_dir: TempDir,
}

impl Device {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStore::new(temp_dir.path().join("client.db")).expect("store");
        let ledger = MessageLedger::new(temp_dir.path().join("ledger.db")).expect("ledger");
        Device {
            store,
            ledger,
            temp_dir,
        }
    }
}
