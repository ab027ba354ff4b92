//! Directory change watcher for a single file.
//!
//! Wraps the OS notification backend behind a non-blocking [`ChangeSource::poll`]
//! that reports only what happened to one file name in one directory.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};

use super::error::WatcherError;
use crate::config::{WatcherBackend, WatcherConfig};

/// What happened to the watched file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileEvent {
    /// The file was created.
    pub created: bool,
    /// Another file was renamed onto the watched name.
    pub created_by_rename: bool,
    /// The file's contents changed.
    pub modified: bool,
    /// The watched file was renamed to this name.
    pub renamed_to: Option<String>,
}

/// Result of one non-blocking poll.
#[derive(Debug)]
pub enum PollResult {
    /// Nothing queued; back off before polling again.
    NoEvent,
    /// Terminal failure of this watcher instance.
    Error(WatcherError),
    /// An event for the watched file.
    FileEvent(FileEvent),
    /// An event was consumed but filtered; poll again without waiting.
    MoreAvailable,
}

/// Anything that can be polled for file events.
pub trait ChangeSource {
    fn poll(&mut self) -> PollResult;

    /// Release the source after a clean shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying watch cannot be removed.
    fn cleanup(self) -> Result<(), WatcherError>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Cookie of a "renamed from" notification for the watched name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRename {
    tracker: Option<usize>,
}

/// Turns raw notify events into [`PollResult`]s for one file name.
///
/// Renames arrive as a "from" and a "to" half sharing a tracker cookie (the
/// Windows backend has no cookie, the halves are simply adjacent). The "from"
/// half for the watched name is held back and the matching "to" half becomes
/// one `renamed_to` event. Any other event clears the held cookie.
#[derive(Debug)]
pub(crate) struct EventFilter {
    file_name: OsString,
    pending: Option<PendingRename>,
}

impl EventFilter {
    pub(crate) fn new(file_name: impl Into<OsString>) -> Self {
        Self {
            file_name: file_name.into(),
            pending: None,
        }
    }

    pub(crate) fn classify(&mut self, event: &Event) -> PollResult {
        let pending = self.pending.take();
        let target = event.paths.first().and_then(|p| p.file_name());

        if let EventKind::Modify(ModifyKind::Name(RenameMode::To)) = event.kind {
            if pending.is_some_and(|p| p.tracker == event.tracker()) {
                let Some(new_name) = target else {
                    return PollResult::MoreAvailable;
                };
                return PollResult::FileEvent(FileEvent {
                    renamed_to: Some(new_name.to_string_lossy().into_owned()),
                    ..FileEvent::default()
                });
            }
        }

        if target != Some(self.file_name.as_os_str()) {
            return PollResult::MoreAvailable;
        }

        let mut file_event = FileEvent::default();
        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                self.pending = Some(PendingRename {
                    tracker: event.tracker(),
                });
                return PollResult::MoreAvailable;
            }
            EventKind::Create(_) => file_event.created = true,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                file_event.created_by_rename = true;
            }
            // FSEvents reports either half of a rename this way; the tailer
            // notices the file behind the name changed
            EventKind::Modify(
                ModifyKind::Any
                | ModifyKind::Name(RenameMode::Any)
                | ModifyKind::Data(_)
                | ModifyKind::Metadata(
                    notify::event::MetadataKind::Any | notify::event::MetadataKind::WriteTime,
                ),
            ) => file_event.modified = true,
            _ => return PollResult::MoreAvailable,
        }
        PollResult::FileEvent(file_event)
    }
}

/// The notification backend, chosen at run time.
enum Backend {
    Native(RecommendedWatcher),
    Polling(PollWatcher),
}

impl Backend {
    fn create(
        config: &WatcherConfig,
        tx: std_mpsc::Sender<notify::Result<Event>>,
    ) -> notify::Result<Self> {
        let handler = move |result: notify::Result<Event>| {
            let _ = tx.send(result);
        };
        match config.backend {
            WatcherBackend::Native => Ok(Self::Native(RecommendedWatcher::new(
                handler,
                notify::Config::default(),
            )?)),
            WatcherBackend::Polling => Ok(Self::Polling(PollWatcher::new(
                handler,
                notify::Config::default().with_poll_interval(config.poll_interval()),
            )?)),
        }
    }

    fn watch(&mut self, dir: &Path) -> notify::Result<()> {
        match self {
            Self::Native(w) => w.watch(dir, RecursiveMode::NonRecursive),
            Self::Polling(w) => w.watch(dir, RecursiveMode::NonRecursive),
        }
    }

    fn unwatch(&mut self, dir: &Path) -> notify::Result<()> {
        match self {
            Self::Native(w) => w.unwatch(dir),
            Self::Polling(w) => w.unwatch(dir),
        }
    }
}

/// Watches one file name inside a directory for create, modify and rename.
pub struct ChangeWatcher {
    dir: PathBuf,
    backend: Backend,
    events: std_mpsc::Receiver<notify::Result<Event>>,
    filter: EventFilter,
    failed: bool,
}

impl ChangeWatcher {
    /// Start watching `file_name` in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be created or the directory
    /// cannot be watched (missing, permission denied, watch limit reached).
    pub fn init(dir: &Path, file_name: &str, config: &WatcherConfig) -> Result<Self, WatcherError> {
        let (tx, events) = std_mpsc::channel();
        let mut backend = Backend::create(config, tx)?;
        backend.watch(dir)?;
        tracing::debug!(
            dir = %dir.display(),
            file = %file_name,
            backend = ?config.backend,
            "Watching for log changes"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            backend,
            events,
            filter: EventFilter::new(file_name),
            failed: false,
        })
    }

    /// Directory being watched.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

}

impl ChangeSource for ChangeWatcher {
    fn poll(&mut self) -> PollResult {
        if self.failed {
            return PollResult::Error(WatcherError::Failed);
        }
        match self.events.try_recv() {
            Ok(Ok(event)) => self.filter.classify(&event),
            Ok(Err(e)) => {
                self.failed = true;
                PollResult::Error(WatcherError::Notify(e))
            }
            Err(std_mpsc::TryRecvError::Empty) => PollResult::NoEvent,
            Err(std_mpsc::TryRecvError::Disconnected) => {
                self.failed = true;
                PollResult::Error(WatcherError::ChannelClosed)
            }
        }
    }

    fn cleanup(mut self) -> Result<(), WatcherError> {
        if self.failed {
            return Ok(());
        }
        self.backend.unwatch(&self.dir)?;
        Ok(())
    }
}
