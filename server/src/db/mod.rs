/// Room store backed by SQLite.
///
/// The store is the source of truth for membership and ownership. Every
/// read-modify-write runs inside one transaction with conditional `WHERE`
/// clauses, so concurrent joins cannot lose member rows or transfer ownership
/// twice.
pub mod init;
pub mod models;

use models::{AutoDeletePolicy, NewRoom, QrArtifact, Room};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type DbPool = Arc<Mutex<Connection>>;

/// Create a connection pool (simplified for single-threaded SQLite)
pub fn create_pool(db_path: &str) -> SqliteResult<DbPool> {
    let conn = Connection::open(db_path)?;
    init::initialize_database(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Create an in-memory database for testing
pub fn create_test_pool() -> DbPool {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory DB");
    init::initialize_database(&conn).expect("Failed to initialize DB");
    Arc::new(Mutex::new(conn))
}

/// Result of an insert attempt for a new room
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// Another room already uses the code
    CodeTaken,
    /// The creating device already owns the maximum number of rooms
    QuotaExceeded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// Room removed; carries the member tokens that were released
    Deleted(Vec<String>),
    NotOwner,
    NotFound,
}

const ROOM_COLUMNS: &str = "room_code, owner_token, owner_expires_at, password, auto_delete, \
     device_id, created_at, qr_image, qr_url, qr_expires_at";

fn room_from_row(row: &Row<'_>) -> SqliteResult<Room> {
    let auto_delete: String = row.get(4)?;
    let qr_image: Option<String> = row.get(7)?;
    let qr_url: Option<String> = row.get(8)?;
    let qr_expires_at: Option<i64> = row.get(9)?;

    let qr = match (qr_image, qr_url, qr_expires_at) {
        (Some(image), Some(url), Some(expires_at)) => Some(QrArtifact {
            image,
            url,
            expires_at,
        }),
        _ => None,
    };

    Ok(Room {
        room_code: row.get(0)?,
        owner_token: row.get(1)?,
        owner_expires_at: row.get(2)?,
        password: row.get(3)?,
        auto_delete: AutoDeletePolicy::parse(&auto_delete).unwrap_or_default(),
        device_id: row.get(5)?,
        created_at: row.get(6)?,
        qr,
    })
}

/// Database operations
pub struct Database;

impl Database {
    /// Insert a room and its owner as first member, enforcing the per-device quota.
    /// The quota check and both inserts share one transaction.
    pub async fn insert_room(
        pool: &DbPool,
        room: &NewRoom,
        max_rooms_per_device: i64,
    ) -> SqliteResult<InsertOutcome> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let owned: i64 = tx.query_row(
            "SELECT COUNT(*) FROM rooms WHERE device_id = ?1",
            params![room.device_id],
            |row| row.get(0),
        )?;
        if owned >= max_rooms_per_device {
            return Ok(InsertOutcome::QuotaExceeded);
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO rooms (room_code, owner_token, owner_expires_at, password, auto_delete, device_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                room.room_code,
                room.owner_token,
                room.owner_expires_at,
                room.password,
                room.auto_delete.as_str(),
                room.device_id,
                room.created_at,
            ],
        )?;
        if inserted == 0 {
            return Ok(InsertOutcome::CodeTaken);
        }

        tx.execute(
            "INSERT INTO room_members (room_code, token, expires_at, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![room.room_code, room.owner_token, room.owner_expires_at, room.created_at],
        )?;

        tx.commit()?;
        Ok(InsertOutcome::Inserted)
    }

    /// Get room by code
    pub async fn get_room(pool: &DbPool, room_code: &str) -> SqliteResult<Option<Room>> {
        let conn = pool.lock().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM rooms WHERE room_code = ?1",
            ROOM_COLUMNS
        ))?;

        let room = stmt.query_row(params![room_code], room_from_row).optional()?;

        Ok(room)
    }

    /// Number of rooms created by a device
    pub async fn count_rooms_for_device(pool: &DbPool, device_id: &str) -> SqliteResult<i64> {
        let conn = pool.lock().await;
        conn.query_row(
            "SELECT COUNT(*) FROM rooms WHERE device_id = ?1",
            params![device_id],
            |row| row.get(0),
        )
    }

    pub async fn member_count(pool: &DbPool, room_code: &str) -> SqliteResult<i64> {
        let conn = pool.lock().await;
        conn.query_row(
            "SELECT COUNT(*) FROM room_members WHERE room_code = ?1",
            params![room_code],
            |row| row.get(0),
        )
    }

    pub async fn member_tokens(pool: &DbPool, room_code: &str) -> SqliteResult<Vec<String>> {
        let conn = pool.lock().await;

        let mut stmt = conn.prepare("SELECT token FROM room_members WHERE room_code = ?1")?;
        let tokens = stmt
            .query_map(params![room_code], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(tokens)
    }

    pub async fn is_member(pool: &DbPool, room_code: &str, token: &str) -> SqliteResult<bool> {
        let conn = pool.lock().await;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM room_members WHERE room_code = ?1 AND token = ?2",
                params![room_code, token],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Add a token to a room's member set. Returns false if it was already present
    /// or the room no longer exists.
    pub async fn add_member(
        pool: &DbPool,
        room_code: &str,
        token: &str,
        expires_at: i64,
        now: i64,
    ) -> SqliteResult<bool> {
        let conn = pool.lock().await;
        let added = conn.execute(
            "INSERT OR IGNORE INTO room_members (room_code, token, expires_at, joined_at)
             SELECT ?1, ?2, ?3, ?4 WHERE EXISTS (SELECT 1 FROM rooms WHERE room_code = ?1)",
            params![room_code, token, expires_at, now],
        )?;
        Ok(added == 1)
    }

    /// Record a join. When `claim_from` is set, ownership moves to `token` only if
    /// the owner is still `claim_from` and the member set is empty at this moment.
    ///
    /// Returns `None` if the room is gone, otherwise whether ownership was taken.
    pub async fn join_room(
        pool: &DbPool,
        room_code: &str,
        token: &str,
        expires_at: i64,
        claim_from: Option<&str>,
        now: i64,
    ) -> SqliteResult<Option<bool>> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM rooms WHERE room_code = ?1",
                params![room_code],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(None);
        }

        let transferred = match claim_from {
            Some(previous_owner) => {
                tx.execute(
                    "UPDATE rooms SET owner_token = ?1, owner_expires_at = ?2
                     WHERE room_code = ?3 AND owner_token = ?4
                       AND NOT EXISTS (SELECT 1 FROM room_members WHERE room_code = ?3)",
                    params![token, expires_at, room_code, previous_owner],
                )? == 1
            }
            None => false,
        };

        tx.execute(
            "INSERT OR IGNORE INTO room_members (room_code, token, expires_at, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![room_code, token, expires_at, now],
        )?;

        tx.commit()?;
        Ok(Some(transferred))
    }

    /// Delete a room if `owner_token` is its current owner
    pub async fn delete_room(
        pool: &DbPool,
        room_code: &str,
        owner_token: &str,
    ) -> SqliteResult<DeleteOutcome> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let current_owner: Option<String> = tx
            .query_row(
                "SELECT owner_token FROM rooms WHERE room_code = ?1",
                params![room_code],
                |row| row.get(0),
            )
            .optional()?;

        match current_owner {
            None => return Ok(DeleteOutcome::NotFound),
            Some(owner) if owner != owner_token => return Ok(DeleteOutcome::NotOwner),
            Some(_) => {}
        }

        let tokens = {
            let mut stmt = tx.prepare("SELECT token FROM room_members WHERE room_code = ?1")?;
            let tokens = stmt
                .query_map(params![room_code], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            tokens
        };

        tx.execute(
            "DELETE FROM rooms WHERE room_code = ?1 AND owner_token = ?2",
            params![room_code, owner_token],
        )?;

        tx.commit()?;
        Ok(DeleteOutcome::Deleted(tokens))
    }

    /// Replace the room's QR artifact, but only if the stored one is missing or expired.
    /// Returns false when a live artifact was already present.
    pub async fn store_qr_if_stale(
        pool: &DbPool,
        room_code: &str,
        artifact: &QrArtifact,
        now: i64,
    ) -> SqliteResult<bool> {
        let conn = pool.lock().await;
        let updated = conn.execute(
            "UPDATE rooms SET qr_image = ?1, qr_url = ?2, qr_expires_at = ?3
             WHERE room_code = ?4 AND (qr_expires_at IS NULL OR qr_expires_at <= ?5)",
            params![artifact.image, artifact.url, artifact.expires_at, room_code, now],
        )?;
        Ok(updated == 1)
    }

    /// Remove member rows whose tokens have expired
    pub async fn prune_expired_members(pool: &DbPool, now: i64) -> SqliteResult<usize> {
        let conn = pool.lock().await;
        conn.execute(
            "DELETE FROM room_members WHERE expires_at <= ?1",
            params![now],
        )
    }

    /// Delete rooms without members created before `created_before`.
    /// Returns the deleted room codes.
    pub async fn delete_abandoned_rooms(
        pool: &DbPool,
        created_before: i64,
    ) -> SqliteResult<Vec<String>> {
        let mut conn = pool.lock().await;
        let tx = conn.transaction()?;

        let codes = {
            let mut stmt = tx.prepare(
                "SELECT room_code FROM rooms r
                 WHERE created_at < ?1
                   AND NOT EXISTS (SELECT 1 FROM room_members m WHERE m.room_code = r.room_code)",
            )?;
            let codes = stmt
                .query_map(params![created_before], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            codes
        };

        for code in &codes {
            tx.execute(
                "DELETE FROM rooms WHERE room_code = ?1
                   AND NOT EXISTS (SELECT 1 FROM room_members WHERE room_code = ?1)",
                params![code],
            )?;
        }

        tx.commit()?;
        Ok(codes)
    }
}
