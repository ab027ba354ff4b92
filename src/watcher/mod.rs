//! Watcher module for server log directories.
//!
//! Discovers rotated log files, watches the live log for changes and reads
//! what was appended to it.

mod change_watcher;
mod discovery;
mod error;
mod tailer;

pub use change_watcher::{ChangeSource, ChangeWatcher, FileEvent, PollResult};
pub use discovery::{
    base_name, classify_log_name, discover_log_files, local_midnight, midnight_of, LogName,
    LogSource, SourceKind,
};
pub use error::WatcherError;
pub use tailer::{find_file, FileId, LogTailer, TailRead};
