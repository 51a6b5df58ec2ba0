//! Versioned schema creation for the captcha image store.

use log::{error, info};
use rusqlite::{Connection, OptionalExtension, params};

use super::{StoreError, StoreResult};

/// Database schema version
const SCHEMA_VERSION: u32 = 1;

/// Creates or validates the schema on `conn`.
pub fn initialize_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    let current_version = get_schema_version(conn)?;
    if current_version == 0 {
        create_initial_schema(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        info!("Database schema initialized to version {}", SCHEMA_VERSION);
    } else if current_version > SCHEMA_VERSION {
        error!(
            "Database schema version {} is newer than supported version {}",
            current_version, SCHEMA_VERSION
        );
        return Err(StoreError::SchemaVersion {
            found: current_version,
            supported: SCHEMA_VERSION,
        });
    }

    Ok(())
}

fn create_initial_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "BEGIN;

        -- Finalized images already used for captchas
        CREATE TABLE IF NOT EXISTS images (
            md5 TEXT PRIMARY KEY,
            rating TEXT NOT NULL,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS image_tags (
            md5 TEXT NOT NULL,
            tag TEXT NOT NULL,
            FOREIGN KEY(md5) REFERENCES images(md5) ON DELETE CASCADE,
            UNIQUE(md5, tag)
        );

        -- Validated candidates waiting to be handed out
        CREATE TABLE IF NOT EXISTS pending_images (
            md5 TEXT PRIMARY KEY,
            target_tag TEXT NOT NULL,
            url TEXT NOT NULL,
            rating TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pending_image_tags (
            md5 TEXT NOT NULL,
            tag TEXT NOT NULL,
            FOREIGN KEY(md5) REFERENCES pending_images(md5) ON DELETE CASCADE,
            UNIQUE(md5, tag)
        );

        -- Permanently rejected hashes
        CREATE TABLE IF NOT EXISTS blacklist (
            md5 TEXT PRIMARY KEY,
            blacklisted_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_pending_images_target_tag
            ON pending_images(target_tag);
        CREATE INDEX IF NOT EXISTS idx_image_tags_tag ON image_tags(tag);

        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY,
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        COMMIT;",
    )?;
    Ok(())
}

fn get_schema_version(conn: &Connection) -> StoreResult<u32> {
    let table_exists: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            [],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
    if !table_exists {
        return Ok(0);
    }

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: u32) -> StoreResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version, updated_at)
         VALUES (1, ?1, datetime('now'))",
        params![version],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_initialization_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        for expected in ["blacklist", "image_tags", "images", "pending_image_tags", "pending_images"] {
            assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
        }
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();

        assert!(matches!(
            initialize_schema(&conn),
            Err(StoreError::SchemaVersion { .. })
        ));
    }
}
