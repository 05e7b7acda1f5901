// ABOUTME: High-level storage manager for the base directory that holds every collection.
// ABOUTME: Handles directory creation, collection discovery, and opening collections or actor handles.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::actor::{self, ActorOptions, CollectionHandle};
use crate::collection::{
    Collection, CollectionError, CollectionOptions, JOURNAL_FILE, validate_name,
};
use crate::config::StoreConfig;

/// Errors that can occur during storage management operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("collection error: {0}")]
    Collection(#[from] CollectionError),
}

/// Owns the base directory layout (`<home>/<name>/journal.log`) and opens
/// collections with a shared set of options.
pub struct StorageManager {
    home: PathBuf,
    options: CollectionOptions,
    actor_options: ActorOptions,
}

impl StorageManager {
    /// Create a new StorageManager rooted at the given home directory.
    /// Creates the home directory if it does not exist.
    pub fn new(home: PathBuf) -> Result<Self, ManagerError> {
        fs::create_dir_all(&home)?;
        Ok(Self {
            home,
            options: CollectionOptions::default(),
            actor_options: ActorOptions::default(),
        })
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self, ManagerError> {
        let mut manager = Self::new(config.home.clone())?;
        manager.options = config.collection_options();
        manager.actor_options = config.actor_options();
        Ok(manager)
    }

    /// Return the home directory path.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Get the path to a collection's directory (does not create it).
    pub fn collection_dir(&self, name: &str) -> Result<PathBuf, ManagerError> {
        validate_name(name)?;
        Ok(self.home.join(name))
    }

    /// Scan the home directory and return the names of all collections,
    /// sorted. A collection is a directory holding a journal.
    pub fn list_collections(&self) -> Result<Vec<String>, ManagerError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.home)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if path.join(JOURNAL_FILE).is_file() {
                names.push(name_str.into_owned());
            } else {
                tracing::warn!("skipping directory without a journal: {}", name_str);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Open a collection for direct, single-owner use.
    pub fn open(&self, name: &str) -> Result<Collection, ManagerError> {
        Ok(Collection::open_with(&self.home, name, self.options)?)
    }

    /// Open a collection and hand it to an actor. Must be called from
    /// within a tokio runtime.
    pub fn open_handle(&self, name: &str) -> Result<CollectionHandle, ManagerError> {
        let collection = self.open(name)?;
        Ok(actor::spawn(collection, self.actor_options))
    }
}
