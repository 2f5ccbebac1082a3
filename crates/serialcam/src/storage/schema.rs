//! `SQLite` schema definitions for the image catalog.
//!
//! This module contains the SQL statements for creating the base schema.
//! Later changes live in [`migrations`](super::migrations).

/// SQL statement to create the images table.
pub const CREATE_IMAGES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_name TEXT NOT NULL UNIQUE,
    captured_at TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create an index on `captured_at` for recency queries.
pub const CREATE_CAPTURED_AT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_images_captured_at ON images(captured_at DESC)
";

/// SQL statement to create an index on `content_hash` for deduplication.
pub const CREATE_HASH_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_images_hash ON images(content_hash)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_IMAGES_TABLE,
    CREATE_CAPTURED_AT_INDEX,
    CREATE_HASH_INDEX,
    CREATE_METADATA_TABLE,
];
