/// Client-side message ledger.
///
/// Keeps the messages of each joined room in arrival order. Attachment
/// payloads are held in a separate table keyed by message id so list reads
/// stay cheap. A message is alive while `now - timestamp < policy duration`;
/// every read filters on that, and `expire`/`sweep` physically remove what
/// the filter already hides. Both removal paths are idempotent.
use crate::error::Result;
use crate::models::{AutoDeletePolicy, ChatMessage};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// Attachment metadata kept in the list row
#[derive(Debug, Clone, PartialEq)]
pub struct FileMeta {
    pub original_name: String,
    pub size: u64,
    pub mime_type: String,
}

/// A message as held in the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub id: String,
    pub author: String,
    pub body: Option<String>,
    pub file: Option<FileMeta>,
    pub has_attachment: bool,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub auto_delete: AutoDeletePolicy,
    pub expires_at: i64,
}

impl From<&ChatMessage> for LedgerEntry {
    fn from(message: &ChatMessage) -> Self {
        LedgerEntry {
            id: message.id.clone(),
            author: message.author.clone(),
            body: message.body.clone(),
            file: message.file_info.as_ref().map(|f| FileMeta {
                original_name: f.original_name.clone(),
                size: f.size,
                mime_type: f.mime_type.clone(),
            }),
            has_attachment: message
                .file_info
                .as_ref()
                .is_some_and(|f| f.data.is_some()),
            timestamp: message.timestamp,
            auto_delete: message.auto_delete,
            expires_at: message.expires_at(),
        }
    }
}

impl LedgerEntry {
    pub fn is_alive_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now.timestamp_millis()
    }

    /// Time left before expiry, zero once expired
    pub fn remaining_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        chrono::Duration::milliseconds((self.expires_at - now.timestamp_millis()).max(0))
    }
}

/// What a sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub messages_removed: usize,
    pub attachments_removed: usize,
}

const ENTRY_COLUMNS: &str = "id, author, body, file_name, file_size, mime_type, has_attachment, \
     timestamp, auto_delete, expires_at";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let file_name: Option<String> = row.get(3)?;
    let file_size: Option<i64> = row.get(4)?;
    let mime_type: Option<String> = row.get(5)?;
    let auto_delete: String = row.get(8)?;

    Ok(LedgerEntry {
        id: row.get(0)?,
        author: row.get(1)?,
        body: row.get(2)?,
        file: file_name.map(|original_name| FileMeta {
            original_name,
            size: file_size.unwrap_or_default().max(0) as u64,
            mime_type: mime_type.unwrap_or_default(),
        }),
        has_attachment: row.get(6)?,
        timestamp: row.get(7)?,
        auto_delete: AutoDeletePolicy::parse(&auto_delete).unwrap_or_default(),
        expires_at: row.get(9)?,
    })
}

pub struct MessageLedger {
    conn: Connection,
}

impl MessageLedger {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;
        Ok(Self { conn })
    }

    fn initialize(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                room_code TEXT NOT NULL,
                id TEXT NOT NULL,
                author TEXT NOT NULL,
                body TEXT,
                file_name TEXT,
                file_size INTEGER,
                mime_type TEXT,
                has_attachment INTEGER NOT NULL DEFAULT 0,
                timestamp INTEGER NOT NULL,
                auto_delete TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                UNIQUE (room_code, id)
            );

            CREATE TABLE IF NOT EXISTS ledger_attachments (
                room_code TEXT NOT NULL,
                message_id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (room_code, message_id)
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_room ON ledger_messages(room_code, seq);
            CREATE INDEX IF NOT EXISTS idx_ledger_expiry ON ledger_messages(expires_at);
            "#,
        )?;
        Ok(())
    }

    /// Append a received message. Returns false if its id was already recorded.
    pub fn record(&self, room_code: &str, message: &ChatMessage) -> Result<bool> {
        let file = message.file_info.as_ref();
        let payload = file.and_then(|f| f.data.as_deref());

        let tx = self.conn.unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO ledger_messages
                (room_code, id, author, body, file_name, file_size, mime_type, has_attachment, timestamp, auto_delete, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                room_code,
                message.id,
                message.author,
                message.body,
                file.map(|f| f.original_name.as_str()),
                file.map(|f| f.size as i64),
                file.map(|f| f.mime_type.as_str()),
                payload.is_some(),
                message.timestamp,
                message.auto_delete.as_str(),
                message.expires_at(),
            ],
        )?;

        if inserted == 1 {
            if let Some(data) = payload {
                tx.execute(
                    "INSERT OR REPLACE INTO ledger_attachments (message_id, room_code, data) VALUES (?1, ?2, ?3)",
                    params![message.id, room_code, data],
                )?;
            }
        }

        tx.commit()?;
        Ok(inserted == 1)
    }

    /// Live messages of a room in arrival order
    pub fn messages_at(&self, room_code: &str, now: DateTime<Utc>) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM ledger_messages WHERE room_code = ?1 AND expires_at > ?2 ORDER BY seq",
            ENTRY_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![room_code, now.timestamp_millis()], entry_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn messages(&self, room_code: &str) -> Result<Vec<LedgerEntry>> {
        self.messages_at(room_code, Utc::now())
    }

    /// Attachment payload (base64) of a message in a room
    pub fn attachment(&self, room_code: &str, message_id: &str) -> Result<Option<String>> {
        let data = self
            .conn
            .query_row(
                "SELECT data FROM ledger_attachments WHERE room_code = ?1 AND message_id = ?2",
                params![room_code, message_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }

    /// Remove an expired message and its attachment, then compact the room's
    /// list to its live entries. Safe to call repeatedly or for unknown ids;
    /// a message that is still alive is left alone.
    ///
    /// Returns the number of list entries removed.
    pub fn expire(&self, room_code: &str, message_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let now_ms = now.timestamp_millis();
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "DELETE FROM ledger_attachments WHERE message_id = ?1 AND room_code = ?2
               AND NOT EXISTS (
                 SELECT 1 FROM ledger_messages
                 WHERE room_code = ?2 AND id = ?1 AND expires_at > ?3
               )",
            params![message_id, room_code, now_ms],
        )?;

        let removed = tx.execute(
            "DELETE FROM ledger_messages WHERE room_code = ?1 AND expires_at <= ?2",
            params![room_code, now_ms],
        )?;

        tx.commit()?;
        Ok(removed)
    }

    /// Compact every room and purge attachments whose message did not survive
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let tx = self.conn.unchecked_transaction()?;

        let messages_removed = tx.execute(
            "DELETE FROM ledger_messages WHERE expires_at <= ?1",
            params![now.timestamp_millis()],
        )?;
        let attachments_removed = tx.execute(
            "DELETE FROM ledger_attachments WHERE NOT EXISTS (
               SELECT 1 FROM ledger_messages m
               WHERE m.id = ledger_attachments.message_id
                 AND m.room_code = ledger_attachments.room_code
             )",
            [],
        )?;

        tx.commit()?;

        if messages_removed > 0 || attachments_removed > 0 {
            log::debug!(
                "Ledger sweep removed {} messages and {} attachments",
                messages_removed,
                attachments_removed
            );
        }

        Ok(SweepReport {
            messages_removed,
            attachments_removed,
        })
    }

    pub fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now())
    }

    /// Drop everything held for a room. Returns the number of messages removed.
    pub fn clear_room(&self, room_code: &str) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM ledger_attachments WHERE room_code = ?1",
            params![room_code],
        )?;
        let removed = tx.execute(
            "DELETE FROM ledger_messages WHERE room_code = ?1",
            params![room_code],
        )?;
        tx.commit()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileInfo;
    use chrono::{Duration, TimeZone};

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn message(id: &str, timestamp: i64, policy: AutoDeletePolicy) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            author: "Alice".to_string(),
            body: Some(format!("body of {}", id)),
            file_info: None,
            timestamp,
            auto_delete: policy,
        }
    }

    fn with_file(mut message: ChatMessage) -> ChatMessage {
        message.file_info = Some(FileInfo {
            original_name: "cat.png".to_string(),
            size: 3,
            mime_type: "image/png".to_string(),
            data: Some("AAEC".to_string()),
        });
        message
    }

    #[test]
    fn test_record_deduplicates_by_id() {
        let ledger = MessageLedger::in_memory().unwrap();
        let msg = message("m1", 1_000, AutoDeletePolicy::OneHour);

        assert!(ledger.record("ROOM01", &msg).unwrap());
        assert!(!ledger.record("ROOM01", &msg).unwrap());
        assert_eq!(ledger.messages_at("ROOM01", at(2_000)).unwrap().len(), 1);
    }

    #[test]
    fn test_messages_keep_arrival_order() {
        let ledger = MessageLedger::in_memory().unwrap();
        // Arrival order wins over timestamps
        ledger.record("ROOM01", &message("late", 5_000, AutoDeletePolicy::OneHour)).unwrap();
        ledger.record("ROOM01", &message("early", 1_000, AutoDeletePolicy::OneHour)).unwrap();
        ledger.record("ROOM02", &message("other", 1_000, AutoDeletePolicy::OneHour)).unwrap();

        let ids: Vec<String> = ledger
            .messages_at("ROOM01", at(6_000))
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["late".to_string(), "early".to_string()]);
    }

    #[test]
    fn test_one_minute_message_disappears_from_filtered_read() {
        let ledger = MessageLedger::in_memory().unwrap();
        let sent = at(1_700_000_000_000);
        ledger
            .record("ROOM01", &message("m1", sent.timestamp_millis(), AutoDeletePolicy::OneMinute))
            .unwrap();

        assert_eq!(ledger.messages_at("ROOM01", sent).unwrap().len(), 1);
        assert_eq!(
            ledger.messages_at("ROOM01", sent + Duration::seconds(59)).unwrap().len(),
            1
        );
        // Expiry is exclusive
        assert!(ledger
            .messages_at("ROOM01", sent + Duration::seconds(60))
            .unwrap()
            .is_empty());
        assert!(ledger
            .messages_at("ROOM01", sent + Duration::seconds(61))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_attachment_is_stored_out_of_band() {
        let ledger = MessageLedger::in_memory().unwrap();
        ledger
            .record("ROOM01", &with_file(message("m1", 1_000, AutoDeletePolicy::OneHour)))
            .unwrap();

        let entry = &ledger.messages_at("ROOM01", at(2_000)).unwrap()[0];
        assert!(entry.has_attachment);
        assert_eq!(
            entry.file,
            Some(FileMeta {
                original_name: "cat.png".to_string(),
                size: 3,
                mime_type: "image/png".to_string(),
            })
        );
        assert_eq!(ledger.attachment("ROOM01", "m1").unwrap().as_deref(), Some("AAEC"));
    }

    #[test]
    fn test_expire_is_idempotent() {
        let ledger = MessageLedger::in_memory().unwrap();
        ledger
            .record("ROOM01", &with_file(message("m1", 1_000, AutoDeletePolicy::OneMinute)))
            .unwrap();
        ledger.record("ROOM01", &message("m2", 1_000, AutoDeletePolicy::OneHour)).unwrap();

        let after = at(1_000 + 61_000);
        assert_eq!(ledger.expire("ROOM01", "m1", after).unwrap(), 1);
        assert_eq!(ledger.expire("ROOM01", "m1", after).unwrap(), 0);
        assert_eq!(ledger.expire("ROOM01", "unknown", after).unwrap(), 0);

        assert!(ledger.attachment("ROOM01", "m1").unwrap().is_none());
        let ids: Vec<String> = ledger
            .messages_at("ROOM01", after)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["m2".to_string()]);
    }

    #[test]
    fn test_expire_leaves_live_message_alone() {
        let ledger = MessageLedger::in_memory().unwrap();
        ledger
            .record("ROOM01", &with_file(message("m1", 1_000, AutoDeletePolicy::OneMinute)))
            .unwrap();

        assert_eq!(ledger.expire("ROOM01", "m1", at(30_000)).unwrap(), 0);
        assert_eq!(ledger.messages_at("ROOM01", at(30_000)).unwrap().len(), 1);
        assert!(ledger.attachment("ROOM01", "m1").unwrap().is_some());
    }

    #[test]
    fn test_sweep_then_timer_converge() {
        let ledger = MessageLedger::in_memory().unwrap();
        ledger
            .record("ROOM01", &with_file(message("m1", 1_000, AutoDeletePolicy::OneMinute)))
            .unwrap();
        ledger
            .record("ROOM02", &with_file(message("m2", 1_000, AutoDeletePolicy::OneDay)))
            .unwrap();

        let after = at(1_000 + 120_000);
        let report = ledger.sweep_at(after).unwrap();
        assert_eq!(
            report,
            SweepReport {
                messages_removed: 1,
                attachments_removed: 1
            }
        );

        // The timer firing afterwards is a harmless no-op
        assert_eq!(ledger.expire("ROOM01", "m1", after).unwrap(), 0);
        assert_eq!(ledger.sweep_at(after).unwrap(), SweepReport::default());
        assert!(ledger.attachment("ROOM02", "m2").unwrap().is_some());
    }

    #[test]
    fn test_attachments_are_scoped_to_their_room() {
        let ledger = MessageLedger::in_memory().unwrap();
        let mut short = with_file(message("m1", 1_000, AutoDeletePolicy::OneMinute));
        let mut long = with_file(message("m1", 1_000, AutoDeletePolicy::OneDay));
        short.file_info.as_mut().unwrap().data = Some("c2hvcnQ=".to_string());
        long.file_info.as_mut().unwrap().data = Some("bG9uZw==".to_string());

        // Same message id arriving in two rooms
        assert!(ledger.record("ROOM01", &short).unwrap());
        assert!(ledger.record("ROOM02", &long).unwrap());
        assert_eq!(
            ledger.attachment("ROOM01", "m1").unwrap().as_deref(),
            Some("c2hvcnQ=")
        );
        assert_eq!(
            ledger.attachment("ROOM02", "m1").unwrap().as_deref(),
            Some("bG9uZw==")
        );

        // Expiring one room's copy leaves the other's payload
        let after = at(1_000 + 61_000);
        assert_eq!(ledger.expire("ROOM01", "m1", after).unwrap(), 1);
        assert!(ledger.attachment("ROOM01", "m1").unwrap().is_none());
        assert_eq!(
            ledger.attachment("ROOM02", "m1").unwrap().as_deref(),
            Some("bG9uZw==")
        );
    }

    #[test]
    fn test_clear_room() {
        let ledger = MessageLedger::in_memory().unwrap();
        ledger
            .record("ROOM01", &with_file(message("m1", 1_000, AutoDeletePolicy::OneHour)))
            .unwrap();
        ledger.record("ROOM02", &message("m2", 1_000, AutoDeletePolicy::OneHour)).unwrap();

        assert_eq!(ledger.clear_room("ROOM01").unwrap(), 1);
        assert!(ledger.messages_at("ROOM01", at(2_000)).unwrap().is_empty());
        assert!(ledger.attachment("ROOM01", "m1").unwrap().is_none());
        assert_eq!(ledger.messages_at("ROOM02", at(2_000)).unwrap().len(), 1);
    }

    #[test]
    fn test_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let ledger = MessageLedger::new(&path).unwrap();
            ledger.record("ROOM01", &message("m1", 1_000, AutoDeletePolicy::OneDay)).unwrap();
        }

        let ledger = MessageLedger::new(&path).unwrap();
        let entries = ledger.messages_at("ROOM01", at(2_000)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].remaining_at(at(2_000)), Duration::milliseconds(86_400_000 - 1_000));
    }
}
