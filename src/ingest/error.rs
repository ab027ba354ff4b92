//! Ingestion error types.

use std::path::PathBuf;

use crate::config::ConfigError;
use crate::watcher::WatcherError;

/// Errors from backfill and tailing.
///
/// Only directory, configuration and watcher failures stop a run; the
/// per-file variants are logged and the file is skipped.
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    /// A log file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A gzip archive is corrupt.
    #[error("Failed to decompress {path}: {source}")]
    Decompress {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A gzip archive expands past the configured bound.
    #[error("Decompressed size of {path} exceeds {limit} bytes")]
    TooLarge { path: PathBuf, limit: usize },

    /// Directory listing or change watching failed.
    #[error("Watcher error: {0}")]
    Watcher(#[from] WatcherError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
