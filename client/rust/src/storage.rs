/// Local storage for client metadata
///
/// Holds the persistent device id and the rooms this device has joined.
/// Message content lives in the ledger, not here.
use crate::error::Result;
use crate::models::{AutoDeletePolicy, CachedRoom};
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;

/// Local storage manager for SQLite database
pub struct LocalStore {
    conn: Connection,
}

fn cached_room_from_row(row: &Row<'_>) -> rusqlite::Result<CachedRoom> {
    let auto_delete: String = row.get(2)?;
    Ok(CachedRoom {
        room_code: row.get(0)?,
        token: row.get(1)?,
        auto_delete: AutoDeletePolicy::parse(&auto_delete).unwrap_or_default(),
        is_owner: row.get(3)?,
        joined_at: row.get(4)?,
    })
}

impl LocalStore {
    /// Create a new local store with the given database path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Initialize the database schema for application metadata
    fn initialize(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rooms (
                room_code TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                auto_delete TEXT NOT NULL,
                is_owner INTEGER NOT NULL,
                joined_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// The device id, generated and persisted on first use
    pub fn device_id(&self) -> Result<String> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = 'device_id'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(device_id) = existing {
            return Ok(device_id);
        }

        let device_id = format!("device_{}", uuid::Uuid::new_v4().simple());
        self.conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES ('device_id', ?1)",
            (&device_id,),
        )?;
        log::debug!("Generated new device id");

        // Another writer may have won the insert
        let stored: String = self.conn.query_row(
            "SELECT value FROM settings WHERE key = 'device_id'",
            [],
            |row| row.get(0),
        )?;
        Ok(stored)
    }

    /// Remember a joined room, replacing any earlier entry for the same code
    pub fn save_room(&self, room: &CachedRoom) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO rooms (room_code, token, auto_delete, is_owner, joined_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                &room.room_code,
                &room.token,
                room.auto_delete.as_str(),
                room.is_owner,
                room.joined_at,
            ),
        )?;
        Ok(())
    }

    pub fn room(&self, room_code: &str) -> Result<Option<CachedRoom>> {
        let room = self
            .conn
            .query_row(
                "SELECT room_code, token, auto_delete, is_owner, joined_at FROM rooms WHERE room_code = ?1",
                (room_code,),
                cached_room_from_row,
            )
            .optional()?;
        Ok(room)
    }

    /// Cached rooms, most recently joined first
    pub fn rooms(&self) -> Result<Vec<CachedRoom>> {
        let mut stmt = self.conn.prepare(
            "SELECT room_code, token, auto_delete, is_owner, joined_at FROM rooms ORDER BY joined_at DESC",
        )?;
        let rooms = stmt
            .query_map([], cached_room_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rooms)
    }

    /// Drop a cached room. Returns false if it was not cached.
    pub fn forget_room(&self, room_code: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM rooms WHERE room_code = ?1", (room_code,))?;
        Ok(removed > 0)
    }
}
