//! Continuous ingestion of the live log.
//!
//! After a backfill of the archives the driver parses the live log, then
//! follows it through appends, truncation and rotation. The state as of the
//! last rotation is kept as a committed snapshot; truncation and anomalous
//! replacement of the live log restore it and re-parse the live log on top.
//!
//! Rotation is seen either as a rename event or, on backends without rename
//! events, as the live name pointing at a different file than the one being
//! read.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;

use super::backfill::{backfill, live_baseline, BackfillOptions};
use super::error::IngestError;
use super::observer::IngestObserver;
use super::shared::{IngestState, SharedIngest};
use crate::config::TrackerConfig;
use crate::watcher::{
    find_file, ChangeSource, ChangeWatcher, FileEvent, FileId, LogTailer, PollResult, TailRead,
    WatcherError,
};

/// Drives ingestion of one log directory.
pub struct IngestDriver<O> {
    config: TrackerConfig,
    tz: Tz,
    shared: SharedIngest,
    committed: IngestState,
    tailer: LogTailer,
    awaiting_create: bool,
    observer: O,
}

impl<O: IngestObserver> IngestDriver<O> {
    /// Backfill the archives, commit the result as the baseline snapshot and
    /// parse the live log on top of it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the log directory
    /// cannot be listed.
    pub async fn start(config: TrackerConfig, mut observer: O) -> Result<Self, IngestError> {
        let tz = config.time_zone()?;
        let mut state = IngestState::new();
        let options = BackfillOptions {
            include_live: false,
            preserve_context: true,
        };
        backfill(&config, &mut state, options, &mut observer).await?;

        let mut driver = Self {
            tailer: LogTailer::new(config.live_path()),
            config,
            tz,
            committed: state.clone(),
            shared: SharedIngest::new(state),
            awaiting_create: false,
            observer,
        };
        tracing::debug!("Committed baseline snapshot after backfill");
        if let Err(e) = driver.reparse_live(false).await {
            tracing::warn!(error = %e, "Failed to read live log");
        }
        Ok(driver)
    }

    /// Handle to the live state for readers.
    #[must_use]
    pub fn shared(&self) -> SharedIngest {
        self.shared.clone()
    }

    /// State as of the last rotation (or the end of backfill).
    #[must_use]
    pub fn committed(&self) -> &IngestState {
        &self.committed
    }

    #[must_use]
    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Whether the live log was rotated away and no new one was seen yet.
    #[must_use]
    pub fn is_awaiting_create(&self) -> bool {
        self.awaiting_create
    }

    /// Tail the live log with a [`ChangeWatcher`] until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// See [`IngestDriver::run_with`].
    pub async fn run(&mut self, shutdown: &CancellationToken) -> Result<(), IngestError> {
        let dir = self.config.log_dir.clone();
        let file = self.config.live_file.clone();
        let watcher = self.config.watcher.clone();
        self.run_with(|| ChangeWatcher::init(&dir, &file, &watcher), shutdown)
            .await
    }

    /// Open a change source with `open` and drive it until `shutdown` fires.
    ///
    /// A source that fails, or fails to open, is re-opened after
    /// `watcher_restart_delay_ms`. Both kinds of failure count against the
    /// same `max_watcher_restarts` budget.
    ///
    /// # Errors
    ///
    /// Returns the last watcher error once the budget is used up.
    pub async fn run_with<S, F>(
        &mut self,
        mut open: F,
        shutdown: &CancellationToken,
    ) -> Result<(), IngestError>
    where
        S: ChangeSource,
        F: FnMut() -> Result<S, WatcherError>,
    {
        let mut restarts = 0;
        loop {
            let result = match open() {
                Ok(mut source) => {
                    // appends made before the watch existed
                    self.handle_event(FileEvent {
                        modified: true,
                        ..FileEvent::default()
                    })
                    .await;
                    let result = self.drive(&mut source, shutdown).await;
                    if result.is_ok() {
                        if let Err(e) = source.cleanup() {
                            tracing::warn!(error = %e, "Failed to remove log watch");
                        }
                    }
                    result
                }
                Err(e) => Err(e),
            };
            let error = match result {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if restarts >= self.config.max_watcher_restarts {
                tracing::error!(error = %error, restarts, "Log watcher failed, giving up");
                return Err(error.into());
            }
            restarts += 1;
            tracing::error!(error = %error, attempt = restarts, "Log watcher failed, re-initialising");
            tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                () = tokio::time::sleep(self.config.watcher_restart_delay()) => {}
            }
        }
    }

    /// Poll `source` and apply its events until `shutdown` fires.
    ///
    /// `MoreAvailable` is polled again at once; only `NoEvent` backs off.
    ///
    /// # Errors
    ///
    /// Returns the error reported by `source`.
    pub async fn drive<S: ChangeSource>(
        &mut self,
        source: &mut S,
        shutdown: &CancellationToken,
    ) -> Result<(), WatcherError> {
        let backoff = self.config.poll_backoff();
        while !shutdown.is_cancelled() {
            match source.poll() {
                PollResult::MoreAvailable => {}
                PollResult::FileEvent(event) => self.handle_event(event).await,
                PollResult::NoEvent => {
                    tokio::select! {
                        () = shutdown.cancelled() => {}
                        () = tokio::time::sleep(backoff) => {}
                    }
                }
                PollResult::Error(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Apply one watcher event. I/O failures are logged, never returned.
    pub async fn handle_event(&mut self, event: FileEvent) {
        if event.created {
            if let Err(e) = self.on_created().await {
                tracing::warn!(error = %e, "Failed to read live log");
            }
        }
        if event.created_by_rename {
            tracing::warn!(
                file = %self.config.live_file,
                "Another file was renamed onto the live log, re-parsing it"
            );
            if let Err(e) = self.reparse_live(true).await {
                tracing::warn!(error = %e, "Failed to re-parse live log");
            }
        }
        if event.modified {
            if let Err(e) = self.on_modified().await {
                tracing::warn!(error = %e, "Failed to read live log");
            }
        }
        if let Some(new_name) = event.renamed_to {
            self.on_renamed(&new_name).await;
        }
    }

    async fn current_baseline(&self) -> Option<DateTime<Utc>> {
        match live_baseline(&self.config.live_path(), &self.tz).await {
            Ok(baseline) => Some(baseline),
            Err(e) => {
                tracing::debug!(error = %e, "Live log has no modification time");
                None
            }
        }
    }

    async fn on_created(&mut self) -> Result<(), IngestError> {
        if self.tailer.identity().is_some() {
            // still reading a file: either this creation was already handled
            // or the old file was rotated away without a rename event
            tracing::debug!("Live log created while following a file, checking for rotation");
            return self.on_modified().await;
        }
        self.start_live_file().await;
        Ok(())
    }

    /// Begin a new live file in the parser context, read from its start.
    async fn start_live_file(&mut self) {
        self.awaiting_create = false;
        self.tailer.reset();
        let baseline = self.current_baseline().await;
        if let Some(baseline) = baseline {
            let mut state = self.shared.lock().await;
            state.context.begin_file(self.config.live_file.as_str(), baseline);
        }
        tracing::info!(file = %self.config.live_file, "Live log created");
    }

    async fn on_modified(&mut self) -> Result<(), IngestError> {
        if self.awaiting_create {
            tracing::debug!("Live log modified before its creation was seen");
            self.start_live_file().await;
        }
        loop {
            match self.tailer.read_appended().await? {
                TailRead::Unchanged => return Ok(()),
                TailRead::Truncated { .. } => return self.reparse_live(false).await,
                TailRead::Appended(text) => {
                    self.apply(&text).await;
                    return Ok(());
                }
                TailRead::Rotated { rest, previous } => {
                    self.apply(&rest).await;
                    let archive = self.locate(previous).await;
                    self.commit_rotation(archive.as_deref()).await;
                    if FileId::of_path(self.tailer.path()).await.is_none() {
                        self.awaiting_create = true;
                        return Ok(());
                    }
                    self.start_live_file().await;
                }
            }
        }
    }

    async fn on_renamed(&mut self, new_name: &str) {
        if !new_name.ends_with(".log") {
            tracing::warn!(
                name = %new_name,
                "Live log renamed to a name without the log extension, ignoring"
            );
            return;
        }
        let archive = self.config.log_dir.join(new_name);

        let followed = self.tailer.identity();
        let handled = match followed {
            None => self.awaiting_create,
            Some(id) => FileId::of_path(&archive).await.is_some_and(|renamed| renamed != id),
        };
        if handled {
            tracing::debug!(archive = %archive.display(), "Rotation already handled");
            return;
        }

        // anything written between the last read and the rename
        match self.tailer.read_rest().await {
            Ok(text) => self.apply(&text).await,
            Err(e) => {
                tracing::warn!(path = %archive.display(), error = %e, "Failed to read rotated log");
            }
        }
        self.commit_rotation(Some(&archive)).await;
        self.awaiting_create = true;
    }

    /// Where the file with identity `id` went after it left the live name.
    async fn locate(&self, id: FileId) -> Option<PathBuf> {
        match find_file(&self.config.log_dir, id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to look for the rotated log");
                None
            }
        }
    }

    /// Commit the current state as the baseline snapshot and report the
    /// finished file.
    async fn commit_rotation(&mut self, archive: Option<&Path>) {
        self.committed = self.shared.snapshot().await;
        self.tailer.reset();
        match archive {
            Some(path) => {
                tracing::info!(archive = %path.display(), "Live log rotated, committed baseline snapshot");
                self.observer.file_completed(path, false);
            }
            None => {
                tracing::warn!(
                    file = %self.config.live_file,
                    "Live log rotated but its new name is unknown, committed baseline snapshot"
                );
            }
        }
    }

    /// Restore the committed snapshot and parse the whole live log on top.
    async fn reparse_live(&mut self, force_flush: bool) -> Result<(), IngestError> {
        let text = self.tailer.read_from_start().await?;
        let baseline = self.current_baseline().await;

        let mut state = self.shared.lock().await;
        *state = self.committed.clone();
        if let Some(baseline) = baseline {
            state.context.begin_file(self.config.live_file.as_str(), baseline);
        }
        if force_flush {
            state.context.request_flush();
        }
        state.parse(&text);
        let online = state.context.online_count();
        drop(state);

        tracing::debug!(
            path = %self.tailer.path().display(),
            bytes = self.tailer.offset(),
            "Parsed live log from the start"
        );
        self.observer.presence_changed(online);
        Ok(())
    }

    async fn apply(&mut self, text: &str) {
        let mut state = self.shared.lock().await;
        let changed = state.parse(text);
        let online = state.context.online_count();
        drop(state);
        if changed {
            self.observer.presence_changed(online);
        }
    }
}
