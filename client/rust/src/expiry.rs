/// Per-message expiry timers.
///
/// One tokio task per message id sleeps until the message's expiry and then
/// reports it on a channel. The session loop consumes those reports and runs
/// the ledger's deletion routine.
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// A message whose timer fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub room_code: String,
    pub message_id: String,
}

pub struct ExpiryScheduler {
    timers: HashMap<String, JoinHandle<()>>,
    tx: UnboundedSender<Expired>,
}

impl ExpiryScheduler {
    pub fn new() -> (Self, UnboundedReceiver<Expired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ExpiryScheduler {
                timers: HashMap::new(),
                tx,
            },
            rx,
        )
    }

    /// Start a timer for `message_id`. No-op while a live timer exists for it.
    /// Returns whether a new timer was started.
    pub fn schedule(&mut self, room_code: &str, message_id: &str, expires_at: DateTime<Utc>) -> bool {
        if let Some(handle) = self.timers.get(message_id) {
            if !handle.is_finished() {
                return false;
            }
        }

        let delay = (expires_at - Utc::now()).to_std().unwrap_or_default();
        let tx = self.tx.clone();
        let expired = Expired {
            room_code: room_code.to_string(),
            message_id: message_id.to_string(),
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver is gone once the session has ended
            let _ = tx.send(expired);
        });

        self.timers.insert(message_id.to_string(), handle);
        true
    }

    /// Forget a fired timer
    pub fn complete(&mut self, message_id: &str) {
        self.timers.remove(message_id);
    }

    /// Timers that have not fired yet
    pub fn pending(&self) -> usize {
        self.timers.values().filter(|h| !h.is_finished()).count()
    }

    /// Abort every timer, used when leaving a room
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
