//! Hooks for the host process.

use std::path::Path;

use crate::watcher::base_name;

/// Notified by backfill and the tail loop. Must not touch ingestion state.
pub trait IngestObserver: Send {
    /// A file was fully consumed: after each backfilled file, and when the
    /// live log is rotated into an archive.
    fn file_completed(&mut self, path: &Path, compressed: bool);

    /// The number of online players may have changed.
    fn presence_changed(&mut self, _online: usize) {}
}

impl IngestObserver for () {
    fn file_completed(&mut self, _path: &Path, _compressed: bool) {}
}

/// Records the base names of consumed files, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestedFiles {
    names: Vec<String>,
}

impl IngestedFiles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn contains(&self, base_name: &str) -> bool {
        self.names.iter().any(|n| n == base_name)
    }
}

impl IngestObserver for IngestedFiles {
    fn file_completed(&mut self, path: &Path, compressed: bool) {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let name = base_name(file_name).to_string();
        tracing::debug!(file = %name, compressed, "Log file ingested");
        self.names.push(name);
    }
}
