//! Module for reading and writing the current-reading document that backs the dashboard.
//!
//! The store never fails a read: a missing or corrupt document is replaced by the default
//! reading and the problem is only visible in the log.
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::StoreError;
use crate::reading::Reading;

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters for the state store.
pub struct StoreParameters {
    /// Path of the JSON document holding the current reading.
    pub data_file: PathBuf,
    /// Optional weather lookup used to fill a missing document.
    #[serde(default)]
    pub weather: Option<crate::weather::WeatherParameters>,
}

/// Something that can produce a fresh reading when the document is unusable.
pub trait ReadingSource {
    fn fetch(&self) -> Result<Reading, StoreError>;
}

/// Owner of the current-reading document.
///
/// Shared by reference between the archiver thread and the HTTP handlers. The internal lock
/// keeps a `save` from interleaving with a `load` of the same process.
pub struct StateStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl StateStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        StateStore {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current reading, falling back to the default one.
    ///
    /// # Returns
    ///
    /// * The stored reading if the document exists and contains every measurement.
    ///
    /// * `Reading::default()` otherwise. The cause is logged as a warning.
    ///
    pub fn load(&self) -> Reading {
        match self.try_load() {
            Ok(reading) => reading,
            Err(err) => {
                log::warn!(target: "irrigd::store", "Using default reading: \'{}\'", err);
                Reading::default()
            }
        }
    }

    /// Reads the current reading and reports why it could not be read.
    pub fn try_load(&self) -> Result<Reading, StoreError> {
        let _guard = self.lock.read().unwrap_or_else(|poisoned| poisoned.into_inner());

        let content = fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        Ok(serde_json::from_str::<Reading>(&content)?)
    }

    /// Replaces the document with the given reading.
    ///
    /// The reading is written to a temporary file next to the document which is then renamed
    /// over it, so readers see either the old or the new document.
    ///
    /// # Errors
    ///
    /// * The reading cannot be serialized.
    ///
    /// * The temporary file cannot be created, written or renamed.
    ///
    pub fn save(&self, reading: &Reading) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(reading)?;

        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let _guard = self.lock.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        let io_error = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let mut temp_file = NamedTempFile::new_in(&directory).map_err(io_error)?;
        temp_file.write_all(&content).map_err(io_error)?;
        temp_file.as_file().sync_all().map_err(io_error)?;
        temp_file
            .persist(&self.path)
            .map_err(|source| StoreError::Persist {
                path: self.path.clone(),
                source,
            })?;

        log::debug!(target: "irrigd::store", "Saved reading to \'{}\'", self.path.display());
        Ok(())
    }

    /// Reads the current reading and fills a missing or corrupt document from `source`.
    ///
    /// A fetched reading is saved before it is returned. If saving fails the fetched reading is
    /// still returned; if fetching fails the default reading is returned.
    pub fn load_or_populate(&self, source: &dyn ReadingSource) -> Reading {
        let err = match self.try_load() {
            Ok(reading) => return reading,
            Err(err) => err,
        };

        match &err {
            StoreError::Io { source, .. } if source.kind() == ErrorKind::NotFound => {
                log::info!(
                    target: "irrigd::store",
                    "No reading document yet, asking reading source"
                );
            }
            _ => {
                log::warn!(
                    target: "irrigd::store",
                    "Reading document unusable, asking reading source: \'{}\'",
                    err
                );
            }
        }

        match source.fetch() {
            Ok(reading) => {
                if let Err(err) = self.save(&reading) {
                    log::warn!(
                        target: "irrigd::store",
                        "Could not save fetched reading: \'{}\'",
                        err
                    );
                }
                reading
            }
            Err(err) => {
                log::warn!(target: "irrigd::store", "Using default reading: \'{}\'", err);
                Reading::default()
            }
        }
    }
}
