//! `SQLite` ledger of stored images.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::{migrations, StoredImage};

/// Aggregate numbers over the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    /// Number of catalogued images.
    pub total_images: i64,
    /// Sum of image sizes in bytes.
    pub total_bytes: i64,
    /// Capture time of the oldest image.
    pub oldest_capture: Option<DateTime<Utc>>,
    /// Capture time of the newest image.
    pub newest_capture: Option<DateTime<Utc>>,
}

/// Persistent record of every image written by the store.
#[derive(Debug)]
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Open or create a catalog database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema
    /// initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening catalog at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::CatalogOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Catalog opened at {}", path.display());
        Ok(Self { conn })
    }

    /// Create an in-memory catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::CatalogOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Record a stored image and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (including a duplicate file name).
    pub fn insert(&self, image: &StoredImage) -> Result<i64> {
        self.conn.execute(
            r"
            INSERT INTO images (file_name, captured_at, size_bytes, content_hash, source)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                image.file_name,
                image.captured_at.to_rfc3339(),
                i64::try_from(image.size_bytes).unwrap_or(i64::MAX),
                image.content_hash,
                image.source,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Catalogued {} as id {}", image.file_name, id);
        Ok(id)
    }

    /// Check if an image with the given content hash was already stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn exists_by_hash(&self, hash: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM images WHERE content_hash = ?1",
            [hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Most recently captured images, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredImage>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, file_name, captured_at, size_bytes, content_hash, source
            FROM images ORDER BY captured_at DESC, id DESC LIMIT ?1
            ",
        )?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let images = stmt
            .query_map([limit_i64], Self::row_to_image)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(images)
    }

    /// Catalog statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn stats(&self) -> Result<CatalogStats> {
        let (total_images, total_bytes): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM images",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let (oldest, newest): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(captured_at), MAX(captured_at) FROM images",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(CatalogStats {
            total_images,
            total_bytes,
            oldest_capture: oldest.as_deref().and_then(parse_timestamp),
            newest_capture: newest.as_deref().and_then(parse_timestamp),
        })
    }

    fn row_to_image(row: &rusqlite::Row) -> rusqlite::Result<StoredImage> {
        let captured_at: String = row.get(2)?;
        let size_bytes: i64 = row.get(3)?;

        Ok(StoredImage {
            id: Some(row.get(0)?),
            file_name: row.get(1)?,
            captured_at: parse_timestamp(&captured_at).unwrap_or_else(Utc::now),
            size_bytes: u64::try_from(size_bytes).unwrap_or(0),
            content_hash: row.get(4)?,
            source: row.get(5)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
