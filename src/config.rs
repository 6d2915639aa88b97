//! Configuration file handling.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::archive::ArchiveParameters;
use crate::error::ConfigError;
use crate::http::HttpParameters;
use crate::lifecycle::LifecycleParameters;
use crate::store::StoreParameters;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Configuration {
    pub http_parameters: HttpParameters,
    pub store_parameters: StoreParameters,
    pub archive_parameters: ArchiveParameters,
    #[serde(default)]
    pub lifecycle_parameters: LifecycleParameters,
}

impl Configuration {
    /// Reads and validates the YAML configuration at `path`.
    pub fn load(path: &Path) -> Result<Configuration, ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut configuration_string = String::new();
        File::open(path)
            .and_then(|mut file| file.read_to_string(&mut configuration_string))
            .map_err(io_error)?;

        Configuration::from_yaml(&configuration_string)
    }

    pub fn from_yaml(yaml: &str) -> Result<Configuration, ConfigError> {
        let configuration = serde_yaml::from_str::<Configuration>(yaml)?;
        configuration.validate()?;
        Ok(configuration)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let archive = &self.archive_parameters;
        if archive.interval_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "archive interval must be at least one second",
            )));
        }
        let extension = archive.extension.trim_start_matches('.');
        if extension.is_empty() || extension.contains('/') || extension.contains('\\') {
            return Err(ConfigError::Invalid(format!(
                "invalid record extension '{}'",
                archive.extension
            )));
        }
        if self.lifecycle_parameters.uptime_budget_secs == Some(0) {
            return Err(ConfigError::Invalid(String::from(
                "uptime budget must be at least one second",
            )));
        }
        Ok(())
    }
}
