use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::Result;
use crate::receiver::SerialManager;
use crate::storage::ImageStore;

/// State shared by all handlers.
#[derive(Debug)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// Image directory and catalog.
    pub store: Arc<ImageStore>,
    /// The serial connection, if any.
    pub serial: Mutex<SerialManager>,
}

impl AppState {
    /// Assemble state from its parts.
    pub fn new(config: Config, store: Arc<ImageStore>, serial: SerialManager) -> Self {
        Self {
            config,
            store,
            serial: Mutex::new(serial),
        }
    }

    /// Open the image store and a serial manager writing into it.
    ///
    /// # Errors
    ///
    /// Returns an error if the images directory or catalog cannot be opened.
    pub fn from_config(config: Config) -> Result<Self> {
        let store = Arc::new(ImageStore::from_config(&config)?);
        let serial = SerialManager::from_config(&config, store.clone());
        Ok(Self::new(config, store, serial))
    }
}
