//! Error types shared by the store, the archive and the configuration loader.
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
/// Errors raised while reading or writing the current-reading document.
pub enum StoreError {
    #[error("Could not access reading document '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Reading document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Could not persist reading document '{path}': {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },

    #[error("Reading source failed: {0}")]
    Source(String),
}

#[derive(Error, Debug)]
/// Errors raised by the archiver and the archive directory.
pub enum ArchiveError {
    #[error("Archive I/O failed on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Record '{0}' already exists")]
    RecordExists(String),

    #[error("Invalid record name '{0}'")]
    InvalidName(String),

    #[error("Cannot render record document: {0}")]
    Render(String),
}

#[derive(Error, Debug)]
/// Errors raised while loading the YAML configuration.
pub enum ConfigError {
    #[error("Cannot read the configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot deserialize the configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
