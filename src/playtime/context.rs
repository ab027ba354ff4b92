//! Transient parser state: current file, day baseline and who is online.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use super::types::{AggregateStore, PlaySession};

/// Last known state of one display name.
///
/// A join instant without an identity (or the reverse) is a recoverable
/// inconsistency, e.g. a missed UUID line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnlineEntry {
    pub uuid: Option<Uuid>,
    pub joined_at: Option<DateTime<Utc>>,
}

/// Why every online player is being closed out at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// A new file of the same day started while players were still online.
    Restart,
    /// The server logged that it is stopping.
    ServerStopped,
    /// Input ended and the caller wants totals as of a point in time.
    EndOfInput,
}

/// Why a leave line could not close a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveRejected {
    MissingIdentity,
    MissingJoin,
}

/// Parser state for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParserContext {
    file_name: String,
    day_baseline: Option<DateTime<Utc>>,
    line: usize,
    server_stopped: bool,
    flush_pending: bool,
    players: BTreeMap<String, OnlineEntry>,
}

impl ParserContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new source file whose timestamps are relative to `baseline`.
    ///
    /// Returns `true` when the previous file had the same baseline. A second
    /// file on the same day means the server restarted, so anyone still
    /// online is flushed on the first timestamped line of this file.
    pub fn begin_file(&mut self, file_name: impl Into<String>, baseline: DateTime<Utc>) -> bool {
        let same_day = self.day_baseline == Some(baseline);
        self.file_name = file_name.into();
        self.day_baseline = Some(baseline);
        self.line = 0;
        if same_day {
            self.flush_pending = true;
        }
        tracing::debug!(
            file = %self.file_name,
            baseline = %baseline,
            same_day,
            "Starting log file"
        );
        same_day
    }

    /// Flush online players on the next timestamped line regardless of date.
    pub fn request_flush(&mut self) {
        self.flush_pending = true;
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    #[must_use]
    pub fn day_baseline(&self) -> Option<DateTime<Utc>> {
        self.day_baseline
    }

    /// Line number within the current file (1-based once a line was read).
    #[must_use]
    pub fn line(&self) -> usize {
        self.line
    }

    #[must_use]
    pub fn server_stopped(&self) -> bool {
        self.server_stopped
    }

    #[must_use]
    pub fn is_flush_pending(&self) -> bool {
        self.flush_pending
    }

    #[must_use]
    pub fn player(&self, name: &str) -> Option<&OnlineEntry> {
        self.players.get(name)
    }

    /// Number of players with an open join.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.players
            .values()
            .filter(|p| p.joined_at.is_some())
            .count()
    }

    /// Online players and their join instants, sorted by name.
    #[must_use]
    pub fn online_players(&self) -> Vec<(&str, DateTime<Utc>)> {
        self.players
            .iter()
            .filter_map(|(name, p)| p.joined_at.map(|at| (name.as_str(), at)))
            .collect()
    }

    /// Identified online players, for synthesising in-progress sessions.
    pub(crate) fn online_identities(&self) -> impl Iterator<Item = (&str, Uuid, DateTime<Utc>)> {
        self.players
            .iter()
            .filter_map(|(name, p)| Some((name.as_str(), p.uuid?, p.joined_at?)))
    }

    pub(crate) fn advance_line(&mut self) {
        self.line += 1;
    }

    pub(crate) fn take_pending_flush(&mut self) -> bool {
        std::mem::take(&mut self.flush_pending)
    }

    pub(crate) fn set_server_stopped(&mut self, stopped: bool) {
        if self.server_stopped != stopped {
            tracing::debug!(stopped, file = %self.file_name, line = self.line, "Server state changed");
        }
        self.server_stopped = stopped;
    }

    pub(crate) fn set_identity(&mut self, name: &str, uuid: Uuid) {
        self.players.entry(name.to_string()).or_default().uuid = Some(uuid);
    }

    /// Mark `name` online from `at`.
    pub(crate) fn mark_joined(&mut self, name: &str, at: DateTime<Utc>) {
        let entry = self.players.entry(name.to_string()).or_default();
        if entry.uuid.is_none() {
            tracing::warn!(
                player = %name,
                file = %self.file_name,
                line = self.line,
                "UUID not found for player (expected UUID message before join message)"
            );
        }
        if entry.joined_at.is_some() {
            tracing::warn!(
                player = %name,
                file = %self.file_name,
                line = self.line,
                "Player joined again without leaving (ignore if the server crashed while they were online)"
            );
        }
        entry.joined_at = Some(at);
    }

    /// Close the open session of `name` at `at` and record it in `store`.
    pub(crate) fn mark_left(
        &mut self,
        name: &str,
        at: DateTime<Utc>,
        store: &mut AggregateStore,
    ) -> Result<(), LeaveRejected> {
        let Some(entry) = self.players.get_mut(name) else {
            return Err(LeaveRejected::MissingIdentity);
        };
        let Some(uuid) = entry.uuid else {
            return Err(LeaveRejected::MissingIdentity);
        };
        let Some(joined_at) = entry.joined_at.take() else {
            return Err(LeaveRejected::MissingJoin);
        };
        store.record_session(uuid, name, closed_session(name, joined_at, at));
        Ok(())
    }

    /// Treat every online player as leaving at `at`.
    ///
    /// Returns whether anyone was online.
    pub fn flush_online(
        &mut self,
        at: DateTime<Utc>,
        reason: FlushReason,
        store: &mut AggregateStore,
    ) -> bool {
        let mut any = false;
        for (name, entry) in &mut self.players {
            let Some(joined_at) = entry.joined_at.take() else {
                continue;
            };
            any = true;
            let Some(uuid) = entry.uuid else {
                tracing::warn!(
                    player = %name,
                    file = %self.file_name,
                    "Dropping open session of player without a UUID"
                );
                continue;
            };
            let session = closed_session(name, joined_at, at);
            if reason == FlushReason::Restart {
                tracing::warn!(
                    player = %name,
                    file = %self.file_name,
                    leave_time = %session.end().format("%F %T"),
                    "Player never left before the server restarted, assuming leave time"
                );
            }
            store.record_session(uuid, name, session);
        }
        if any {
            tracing::debug!(reason = ?reason, at = %at, "Flushed online players");
        }
        any
    }
}

/// Build the session from `joined_at` to `left_at`.
///
/// Timestamps only carry a time of day, so a leave that sorts before its join
/// wrapped past midnight; it is moved forward by whole days.
fn closed_session(name: &str, joined_at: DateTime<Utc>, left_at: DateTime<Utc>) -> PlaySession {
    let mut duration = left_at - joined_at;
    if duration < TimeDelta::zero() {
        let behind = -duration;
        let mut days = behind.num_days();
        if duration + TimeDelta::days(days) < TimeDelta::zero() {
            days += 1;
        }
        duration += TimeDelta::days(days);
        tracing::warn!(
            player = %name,
            days,
            "Leave time precedes join time, assuming it is on a later day"
        );
    }
    PlaySession {
        start: joined_at,
        duration,
    }
}
