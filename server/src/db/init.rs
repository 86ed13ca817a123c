/// Database schema initialization.
/// Sets up SQLite WAL mode, foreign keys and creates tables on startup.
use rusqlite::{Connection, Result as SqliteResult};

/// Initialize database connection with WAL mode and schema
pub fn initialize_database(conn: &Connection) -> SqliteResult<()> {
    // Enable WAL mode (for file-based DB only, ignore error for in-memory)
    let _ = conn.execute("PRAGMA journal_mode = WAL", []);
    let _ = conn.execute("PRAGMA synchronous = NORMAL", []);
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    create_schema(conn)?;

    Ok(())
}

/// Create all database tables
fn create_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS rooms (
            room_code TEXT PRIMARY KEY,
            owner_token TEXT NOT NULL,
            owner_expires_at INTEGER NOT NULL,
            password TEXT NOT NULL,
            auto_delete TEXT NOT NULL DEFAULT '1h',
            device_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            qr_image TEXT,
            qr_url TEXT,
            qr_expires_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS room_members (
            room_code TEXT NOT NULL,
            token TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            joined_at INTEGER NOT NULL,
            PRIMARY KEY (room_code, token),
            FOREIGN KEY(room_code) REFERENCES rooms(room_code) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_rooms_device ON rooms(device_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_rooms_created ON rooms(created_at);
        CREATE INDEX IF NOT EXISTS idx_room_members_expiry ON room_members(expires_at);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_initialize_in_memory_database() {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory DB");
        initialize_database(&conn).expect("Failed to initialize DB");

        let tables: Vec<String> = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
            )
            .expect("Query failed")
            .query_map([], |row| row.get(0))
            .expect("Mapping failed")
            .collect::<Result<Vec<_>, _>>()
            .expect("Collection failed");

        assert!(tables.contains(&"rooms".to_string()));
        assert!(tables.contains(&"room_members".to_string()));
    }

    #[test]
    fn test_rooms_table_schema() {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory DB");
        initialize_database(&conn).expect("Failed to initialize DB");

        let mut stmt = conn
            .prepare("PRAGMA table_info(rooms)")
            .expect("Query failed");
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("Mapping failed")
            .collect::<Result<Vec<_>, _>>()
            .expect("Collection failed");

        for column in ["room_code", "owner_token", "password", "auto_delete", "device_id", "qr_expires_at"] {
            assert!(columns.contains(&column.to_string()), "missing column {}", column);
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory DB");
        initialize_database(&conn).expect("First init failed");
        initialize_database(&conn).expect("Second init failed");
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory DB");
        initialize_database(&conn).expect("Failed to initialize DB");

        let enabled: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .expect("Query failed");
        assert_eq!(enabled, 1);
    }
}
