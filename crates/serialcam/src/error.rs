//! Error types for serialcam.
//!
//! This module defines the error types used throughout the serialcam crate.
//! Framing itself never fails; everything here belongs to the edges around
//! it (the serial source, the image store, configuration).

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for serialcam operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Source Errors ===
    /// The byte source could not be opened or configured.
    #[error("failed to open serial port '{port}': {message}")]
    SourceUnavailable {
        /// Name of the port that was requested.
        port: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The byte source reached end of stream or the device went away.
    #[error("byte source '{name}' closed")]
    SourceClosed {
        /// Name of the source.
        name: String,
    },

    /// Reading from the byte source failed.
    #[error("failed to read from '{name}': {source}")]
    SourceRead {
        /// Name of the source.
        name: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A serial session is already active.
    #[error("already connected to serial port '{port}'")]
    AlreadyConnected {
        /// Port of the active session.
        port: String,
    },

    // === Image Errors ===
    /// Completed bytes were rejected as an image.
    #[error("image rejected: {reason}")]
    DecodeFailure {
        /// Why the bytes were rejected.
        reason: String,
    },

    /// The requested image does not exist.
    #[error("image not found: {name}")]
    ImageNotFound {
        /// The requested file name.
        name: String,
    },

    /// The requested image name is not a plain file name.
    #[error("invalid image name: {name}")]
    InvalidImageName {
        /// The offending name.
        name: String,
    },

    // === Catalog Errors ===
    /// Failed to open or create the catalog database.
    #[error("failed to open catalog at {path}: {source}")]
    CatalogOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A catalog query failed.
    #[error("catalog query failed: {0}")]
    CatalogQuery(#[from] rusqlite::Error),

    /// Failed to run catalog migrations.
    #[error("catalog migration failed: {message}")]
    CatalogMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for serialcam operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a source unavailable error.
    #[must_use]
    pub fn source_unavailable(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            port: port.into(),
            message: message.into(),
        }
    }

    /// Create a source closed error.
    #[must_use]
    pub fn source_closed(name: impl Into<String>) -> Self {
        Self::SourceClosed { name: name.into() }
    }

    /// Create a decode failure error.
    #[must_use]
    pub fn decode_failure(reason: impl Into<String>) -> Self {
        Self::DecodeFailure {
            reason: reason.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error means the byte source is gone for good.
    #[must_use]
    pub fn is_source_closed(&self) -> bool {
        matches!(self, Self::SourceClosed { .. })
    }

    /// Check if this error is a missing image.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ImageNotFound { .. })
    }

    /// Check if this error was caused by bad caller input.
    #[must_use]
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::InvalidImageName { .. })
    }
}
