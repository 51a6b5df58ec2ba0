//! Persistent image store.
//!
//! Holds three disjoint sets of MD5 hashes:
//! 1. Finalized images already used for captchas
//! 2. Pending images validated but not handed out yet
//! 3. The blacklist of permanently rejected hashes

mod schema;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use thiserror::Error;

use crate::models::{Image, Md5, PendingImage, Rating};

pub use schema::initialize_schema;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No row matched. Callers decide whether this is an error.
    #[error("No matching rows")]
    NoRows,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database schema version {found} is newer than supported version {supported}")]
    SchemaVersion { found: u32, supported: u32 },

    #[error("Corrupt record for {md5}: {reason}")]
    Corrupt { md5: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operations the sourcing layer needs from persistent storage.
pub trait Store {
    /// True if the hash is a finalized image or blacklisted.
    fn is_in_database(&self, md5: &Md5) -> StoreResult<bool>;
    fn is_pending_image(&self, md5: &Md5) -> StoreResult<bool>;
    fn blacklist_image(&self, md5: &Md5) -> StoreResult<()>;
    fn insert_pending_image(&self, image: &PendingImage) -> StoreResult<()>;
    /// Removes and returns a random pending image for `tag`.
    /// Fails with [`StoreError::NoRows`] when none is available.
    fn pop_random_pending_image(&self, tag: &str) -> StoreResult<PendingImage>;
}

/// SQLite backed [`Store`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        initialize_schema(&conn)?;

        info!("Image store opened: {}", db_path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Records an image as used for captchas.
    pub fn insert_image(&self, image: &Image) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let md5 = image.md5.to_hex();
        tx.execute(
            "INSERT INTO images (md5, rating, source, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![md5, image.rating.as_str(), image.source.as_str(), Utc::now().to_rfc3339()],
        )?;
        insert_tags(&tx, "image_tags", &md5, &image.tags)?;
        tx.commit()?;
        Ok(())
    }

    pub fn is_blacklisted(&self, md5: &Md5) -> StoreResult<bool> {
        self.exists("SELECT 1 FROM blacklist WHERE md5 = ?1", md5)
    }

    /// Number of pending images waiting for `tag`.
    pub fn pending_count(&self, tag: &str) -> StoreResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pending_images WHERE target_tag = ?1",
            params![tag],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn blacklist_count(&self) -> StoreResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM blacklist", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn exists(&self, sql: &str, md5: &Md5) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(sql, params![md5.to_hex()], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }
}

fn insert_tags(tx: &Transaction<'_>, table: &str, md5: &str, tags: &BTreeSet<String>) -> StoreResult<()> {
    let mut stmt = tx.prepare(&format!(
        "INSERT OR IGNORE INTO {} (md5, tag) VALUES (?1, ?2)",
        table
    ))?;
    for tag in tags {
        stmt.execute(params![md5, tag])?;
    }
    Ok(())
}

impl Store for SqliteStore {
    fn is_in_database(&self, md5: &Md5) -> StoreResult<bool> {
        self.exists(
            "SELECT 1 FROM images WHERE md5 = ?1
             UNION ALL
             SELECT 1 FROM blacklist WHERE md5 = ?1
             LIMIT 1",
            md5,
        )
    }

    fn is_pending_image(&self, md5: &Md5) -> StoreResult<bool> {
        self.exists("SELECT 1 FROM pending_images WHERE md5 = ?1", md5)
    }

    fn blacklist_image(&self, md5: &Md5) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let hex = md5.to_hex();
        tx.execute("DELETE FROM pending_images WHERE md5 = ?1", params![hex])?;
        tx.execute(
            "INSERT OR IGNORE INTO blacklist (md5, blacklisted_at) VALUES (?1, ?2)",
            params![hex, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        debug!("Blacklisted {}", hex);
        Ok(())
    }

    fn insert_pending_image(&self, image: &PendingImage) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let md5 = image.md5.to_hex();
        tx.execute(
            "INSERT INTO pending_images (md5, target_tag, url, rating, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                md5,
                image.target_tag,
                image.url,
                image.rating.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        insert_tags(&tx, "pending_image_tags", &md5, &image.tags)?;
        tx.commit()?;
        Ok(())
    }

    fn pop_random_pending_image(&self, tag: &str) -> StoreResult<PendingImage> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let row = tx.query_row(
            "SELECT md5, url, rating FROM pending_images
             WHERE target_tag = ?1
             ORDER BY RANDOM()
             LIMIT 1",
            params![tag],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        );
        let (md5_hex, url, rating) = match row {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Err(StoreError::NoRows),
            Err(e) => return Err(StoreError::Database(e)),
        };

        // Dropping the transaction on a corrupt row keeps the row in place
        let md5 = Md5::from_hex(&md5_hex).map_err(|e| StoreError::Corrupt {
            md5: md5_hex.clone(),
            reason: e.to_string(),
        })?;
        let rating: Rating = rating.parse().map_err(|r| StoreError::Corrupt {
            md5: md5_hex.clone(),
            reason: format!("unknown rating '{}'", r),
        })?;

        let tags = {
            let mut stmt = tx.prepare("SELECT tag FROM pending_image_tags WHERE md5 = ?1")?;
            let rows = stmt.query_map(params![md5_hex], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<BTreeSet<_>, _>>()?
        };
        tx.execute("DELETE FROM pending_images WHERE md5 = ?1", params![md5_hex])?;
        tx.commit()?;

        Ok(PendingImage {
            target_tag: tag.to_string(),
            md5,
            url,
            rating,
            tags,
        })
    }
}
