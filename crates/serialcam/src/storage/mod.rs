//! Image persistence for serialcam.
//!
//! Completed payloads from the frame reassembler are handed to an
//! [`ImageSink`]. The [`ImageStore`] sink writes each image into the images
//! directory under a timestamped name and records it in a [`Catalog`].

pub mod catalog;
pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{Error, Result};

pub use catalog::{Catalog, CatalogStats};

/// JPEG start-of-image marker.
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Extension of stored images.
const IMAGE_EXTENSION: &str = "jpg";

/// Plain file names only: no separators, no leading dot.
static IMAGE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("image name pattern is valid")
});

/// Metadata for an image written to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    /// Catalog id (assigned on insert).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// File name inside the images directory.
    pub file_name: String,
    /// When the image was completed.
    pub captured_at: DateTime<Utc>,
    /// Size of the image in bytes.
    pub size_bytes: u64,
    /// BLAKE3 hash of the image bytes.
    pub content_hash: String,
    /// Byte source the image arrived on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl StoredImage {
    /// Describe `content` stored as `file_name`.
    #[must_use]
    pub fn new(
        file_name: String,
        captured_at: DateTime<Utc>,
        content: &[u8],
        source: Option<String>,
    ) -> Self {
        Self {
            id: None,
            file_name,
            captured_at,
            size_bytes: content.len() as u64,
            content_hash: Self::compute_hash(content),
            source,
        }
    }

    /// Compute the BLAKE3 hash of the given bytes.
    #[must_use]
    pub fn compute_hash(content: &[u8]) -> String {
        blake3::hash(content).to_hex().to_string()
    }
}

/// Destination for completed images.
#[async_trait]
pub trait ImageSink: Send + Sync {
    /// Persist one completed image that arrived on `origin`.
    ///
    /// Returns `None` when the image was intentionally skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DecodeFailure`] if the bytes are rejected as an
    /// image, or an I/O or catalog error if writing fails.
    async fn persist(&self, image: Vec<u8>, origin: &str) -> Result<Option<StoredImage>>;
}

/// Directory-backed image store with a catalog.
#[derive(Debug)]
pub struct ImageStore {
    dir: PathBuf,
    catalog: Mutex<Catalog>,
    validate_jpeg: bool,
    skip_duplicates: bool,
}

impl ImageStore {
    /// Open a store writing into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>, catalog: Catalog) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| Error::DirectoryCreate {
            path: dir.clone(),
            source,
        })?;

        Ok(Self {
            dir,
            catalog: Mutex::new(catalog),
            validate_jpeg: true,
            skip_duplicates: false,
        })
    }

    /// Open the store described by the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or catalog cannot be opened.
    pub fn from_config(config: &Config) -> Result<Self> {
        let catalog = Catalog::open(config.catalog_path())?;
        Ok(Self::open(config.images_dir(), catalog)?
            .with_validation(config.storage.validate_jpeg)
            .with_skip_duplicates(config.storage.skip_duplicates))
    }

    /// Require a JPEG start-of-image marker on stored images.
    #[must_use]
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_jpeg = enabled;
        self
    }

    /// Skip images whose content hash is already catalogued.
    #[must_use]
    pub fn with_skip_duplicates(mut self, enabled: bool) -> Self {
        self.skip_duplicates = enabled;
        self
    }

    /// The images directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one image and catalogue it.
    ///
    /// # Errors
    ///
    /// See [`ImageSink::persist`].
    pub async fn store(&self, image: &[u8], origin: &str) -> Result<Option<StoredImage>> {
        self.check_image(image)?;

        let hash = StoredImage::compute_hash(image);
        if self.skip_duplicates && self.with_catalog(|c| c.exists_by_hash(&hash))? {
            debug!("Skipping duplicate image with hash {}", &hash[..16]);
            return Ok(None);
        }

        let now = Local::now();
        let (file_name, path) = self.create_unique(image, &now).await?;

        let mut stored = StoredImage::new(
            file_name,
            now.with_timezone(&Utc),
            image,
            Some(origin.to_string()),
        );
        match self.with_catalog(|c| c.insert(&stored)) {
            Ok(id) => stored.id = Some(id),
            Err(err) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(err);
            }
        }

        info!(
            "Stored {} ({} bytes) from {}",
            stored.file_name, stored.size_bytes, origin
        );
        Ok(Some(stored))
    }

    /// Names of stored images, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_image = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(IMAGE_EXTENSION));
            if !is_image || !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    /// Read a stored file by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidImageName`] for names that are not plain file
    /// names and [`Error::ImageNotFound`] if no such file exists.
    pub async fn read(&self, name: &str) -> Result<Vec<u8>> {
        if !is_valid_name(name) {
            return Err(Error::InvalidImageName {
                name: name.to_string(),
            });
        }

        match tokio::fs::read(self.dir.join(name)).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(Error::ImageNotFound {
                name: name.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Catalog statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub fn stats(&self) -> Result<CatalogStats> {
        self.with_catalog(Catalog::stats)
    }

    /// Most recently stored images, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog query fails.
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredImage>> {
        self.with_catalog(|c| c.recent(limit))
    }

    fn check_image(&self, image: &[u8]) -> Result<()> {
        if image.is_empty() {
            return Err(Error::decode_failure("image is empty"));
        }
        if self.validate_jpeg && !image.starts_with(&JPEG_SOI) {
            return Err(Error::decode_failure(
                "missing JPEG start-of-image marker",
            ));
        }
        Ok(())
    }

    /// Claim `image_<timestamp>[_n].jpg` and write `image` into it.
    async fn create_unique(
        &self,
        image: &[u8],
        now: &DateTime<Local>,
    ) -> Result<(String, PathBuf)> {
        let stem = format!("image_{}", now.format("%Y%m%d_%H%M%S"));

        for attempt in 0u32.. {
            let file_name = if attempt == 0 {
                format!("{stem}.{IMAGE_EXTENSION}")
            } else {
                format!("{stem}_{attempt}.{IMAGE_EXTENSION}")
            };
            let path = self.dir.join(&file_name);

            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            let mut file = match file {
                Ok(file) => file,
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            };

            if let Err(err) = write_all(&mut file, image).await {
                error!("Failed to write {}: {}", path.display(), err);
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(err.into());
            }
            return Ok((file_name, path));
        }

        Err(Error::internal("exhausted image file names"))
    }

    fn with_catalog<T>(&self, f: impl FnOnce(&Catalog) -> Result<T>) -> Result<T> {
        let catalog = self
            .catalog
            .lock()
            .map_err(|_| Error::internal("catalog lock poisoned"))?;
        f(&catalog)
    }
}

#[async_trait]
impl ImageSink for ImageStore {
    async fn persist(&self, image: Vec<u8>, origin: &str) -> Result<Option<StoredImage>> {
        self.store(&image, origin).await
    }
}

async fn write_all(file: &mut tokio::fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await
}

/// Whether `name` is a plain file name inside the images directory.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    IMAGE_NAME.is_match(name)
}
