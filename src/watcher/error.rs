//! Watcher error types.

use std::path::PathBuf;

/// Failures of the change watcher, the tailer and log discovery.
///
/// Every variant except the I/O ones is fatal to the watcher instance that
/// produced it; the driver re-creates the watcher.
#[derive(thiserror::Error, Debug)]
pub enum WatcherError {
    #[error("Permission denied reading {0}")]
    PermissionDenied(PathBuf),

    #[error("Failed to list log directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The notification backend reported a failure (watch limit, revoked
    /// handle, removed directory).
    #[error("Change notification failed: {0}")]
    Notify(#[from] notify::Error),

    #[error("Log read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Change notification channel disconnected")]
    ChannelClosed,

    /// Polled again after a terminal error.
    #[error("Watcher already failed, re-initialise it")]
    Failed,
}
