//! Configuration file discovery and loading.

use std::path::{Path, PathBuf};

use super::TrackerConfig;

const LOCAL_FILE: &str = ".playtime-tracker.toml";
const APP_DIR: &str = "playtime-tracker";

/// Finds and reads the tracker's TOML configuration.
///
/// Candidates are tried in order; the first one that exists is used and the
/// rest are ignored. No candidate existing is not an error.
#[derive(Debug)]
pub struct ConfigLoader {
    candidates: Vec<PathBuf>,
}

impl ConfigLoader {
    /// `./.playtime-tracker.toml`, then `<config dir>/playtime-tracker/config.toml`.
    #[must_use]
    pub fn new() -> Self {
        let mut candidates = vec![PathBuf::from(LOCAL_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join(APP_DIR).join("config.toml"));
        }
        Self { candidates }
    }

    /// Only consider `path`.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            candidates: vec![path],
        }
    }

    /// Read and validate the first existing candidate, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the chosen file cannot be read or parsed, or holds
    /// an invalid setting.
    pub fn load(&self) -> Result<TrackerConfig, ConfigError> {
        let Some(path) = self.existing() else {
            tracing::debug!(candidates = ?self.candidates, "No config file found, using defaults");
            return Ok(TrackerConfig::default());
        };
        tracing::debug!(path = %path.display(), "Loading config file");
        let config = read_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// The file `load` would read.
    #[must_use]
    pub fn existing(&self) -> Option<&Path> {
        self.candidates
            .iter()
            .map(PathBuf::as_path)
            .find(|p| p.is_file())
    }

    #[must_use]
    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn read_config(path: &Path) -> Result<TrackerConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML in config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Could not locate time zone \"{name}\" (is it an IANA time zone ID?): {reason}")]
    UnknownTimezone { name: String, reason: String },

    #[error("Status format \"{0}\" must contain exactly one {{}} for the number of players")]
    InvalidStatusFormat(String),

    #[error("Live log file name must not be empty")]
    EmptyLiveFile,
}
