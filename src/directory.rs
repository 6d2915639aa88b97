//! Module managing the directory that holds archived records.
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::ArchiveError;

/// Prefix shared by every record filename.
pub const RECORD_PREFIX: &str = "record_";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// Outcome of a purge.
pub struct PurgeReport {
    /// Entries that were removed.
    pub removed: usize,
    /// Entries that could not be removed.
    pub failed: usize,
}

#[derive(Debug, Clone)]
/// Flat directory of record files sharing one extension.
pub struct ArchiveDirectory {
    path: PathBuf,
    extension: String,
}

impl ArchiveDirectory {
    pub fn new<P: Into<PathBuf>>(path: P, extension: &str) -> Self {
        ArchiveDirectory {
            path: path.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Creates the directory and its parents if they are missing.
    pub fn ensure_exists(&self) -> Result<(), ArchiveError> {
        fs::create_dir_all(&self.path).map_err(|source| ArchiveError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn has_record_extension(&self, name: &str) -> bool {
        name.len() > self.extension.len() + 1
            && name.ends_with(&self.extension)
            && name[..name.len() - self.extension.len()].ends_with('.')
    }

    /// Lists the filenames of all records in the directory.
    ///
    /// This is a live scan. Records written while the scan runs may or may not be included.
    /// Names are sorted, which orders them chronologically.
    pub fn list(&self) -> Result<Vec<String>, ArchiveError> {
        let io_error = |source| ArchiveError::Io {
            path: self.path.clone(),
            source,
        };

        let mut records = Vec::new();
        for entry in fs::read_dir(&self.path).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(name) => {
                    log::debug!(
                        target: "irrigd::directory",
                        "Skipping non UTF-8 entry \'{:?}\'",
                        name
                    );
                    continue;
                }
            };
            if !self.has_record_extension(&name) {
                continue;
            }
            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => continue,
                Ok(_) => records.push(name),
                Err(err) => {
                    log::warn!(
                        target: "irrigd::directory",
                        "Cannot stat \'{}\': \'{}\'",
                        name,
                        err
                    );
                }
            }
        }

        records.sort();
        Ok(records)
    }

    /// Returns the path of the record with the given filename.
    ///
    /// # Errors
    ///
    /// * `InvalidName` - The name is not a single path component with the record extension.
    ///
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ArchiveError> {
        let mut components = Path::new(name).components();
        let single_component = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );

        if !single_component || name.contains('\\') || !self.has_record_extension(name) {
            return Err(ArchiveError::InvalidName(name.to_string()));
        }

        Ok(self.path.join(name))
    }

    /// Removes every entry in the directory, leaving the directory itself in place.
    ///
    /// Nested directories are removed recursively and symlinks are removed without touching
    /// their targets. A failing entry is logged and skipped.
    pub fn purge_all(&self) -> PurgeReport {
        let mut report = PurgeReport::default();

        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!(
                    target: "irrigd::directory",
                    "Cannot read archive directory \'{}\': \'{}\'",
                    self.path.display(),
                    err
                );
                report.failed += 1;
                return report;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!(
                        target: "irrigd::directory",
                        "Cannot read archive entry: \'{}\'",
                        err
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let entry_path = entry.path();
            let result = match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => fs::remove_dir_all(&entry_path),
                Ok(_) => fs::remove_file(&entry_path),
                Err(err) => Err(err),
            };

            match result {
                Ok(_) => {
                    log::debug!(
                        target: "irrigd::directory",
                        "Deleted \'{}\'",
                        entry_path.display()
                    );
                    report.removed += 1;
                }
                Err(err) => {
                    log::warn!(
                        target: "irrigd::directory",
                        "Failed to delete \'{}\': \'{}\'",
                        entry_path.display(),
                        err
                    );
                    report.failed += 1;
                }
            }
        }

        log::info!(
            target: "irrigd::directory",
            "Purged archive directory: {} removed, {} failed",
            report.removed,
            report.failed
        );
        report
    }
}
