//! Aggregate playtime types.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One contiguous join-to-leave interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaySession {
    /// When the player joined.
    pub start: DateTime<Utc>,
    /// How long the player stayed. Never negative.
    pub duration: TimeDelta,
}

impl PlaySession {
    /// Instant the session ended.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration
    }
}

/// Sessions of one identity plus their running total.
///
/// `total` always equals the sum of the session durations; the only way to
/// add a session is [`PlaytimeRecord::push`], which updates both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaytimeRecord {
    sessions: Vec<PlaySession>,
    total: TimeDelta,
}

impl Default for PlaytimeRecord {
    fn default() -> Self {
        Self {
            sessions: Vec::new(),
            total: TimeDelta::zero(),
        }
    }
}

impl PlaytimeRecord {
    /// Append a closed session.
    pub fn push(&mut self, session: PlaySession) {
        self.total += session.duration;
        self.sessions.push(session);
    }

    #[must_use]
    pub fn sessions(&self) -> &[PlaySession] {
        &self.sessions
    }

    #[must_use]
    pub fn total(&self) -> TimeDelta {
        self.total
    }
}

/// Name history and playtime for one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateEntry {
    display_names: Vec<String>,
    record: PlaytimeRecord,
}

impl AggregateEntry {
    /// Names observed for this identity, oldest first.
    #[must_use]
    pub fn display_names(&self) -> &[String] {
        &self.display_names
    }

    /// Most recently observed name.
    #[must_use]
    pub fn current_name(&self) -> Option<&str> {
        self.display_names.last().map(String::as_str)
    }

    #[must_use]
    pub fn record(&self) -> &PlaytimeRecord {
        &self.record
    }

    /// Remember `name` unless it is already the latest one.
    fn note_name(&mut self, name: &str) {
        if self.current_name() != Some(name) {
            self.display_names.push(name.to_string());
        }
    }
}

/// Accumulated session data keyed ascending by identity.
///
/// Consumers merge online players into this ordering by binary search, so it
/// stays a sorted map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateStore {
    entries: BTreeMap<Uuid, AggregateEntry>,
}

impl AggregateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a closed session for `uuid`, seen under `name`.
    pub fn record_session(&mut self, uuid: Uuid, name: &str, session: PlaySession) {
        let entry = self.entries.entry(uuid).or_default();
        entry.note_name(name);
        entry.record.push(session);
    }

    #[must_use]
    pub fn get(&self, uuid: &Uuid) -> Option<&AggregateEntry> {
        self.entries.get(uuid)
    }

    /// Entries in ascending identity order.
    pub fn entries(&self) -> impl Iterator<Item = (&Uuid, &AggregateEntry)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of every identity's total.
    #[must_use]
    pub fn total_playtime(&self) -> TimeDelta {
        self.entries
            .values()
            .fold(TimeDelta::zero(), |acc, e| acc + e.record.total())
    }

    /// Flatten into serialisable per-player summaries, ascending by identity.
    #[must_use]
    pub fn summaries(&self) -> Vec<PlayerSummary> {
        self.entries
            .iter()
            .map(|(uuid, entry)| PlayerSummary {
                uuid: *uuid,
                names: entry.display_names.clone(),
                total_seconds: entry.record.total().num_seconds(),
                sessions: entry.record.sessions().len(),
                first_seen: entry.record.sessions().first().map(|s| s.start),
                last_seen: entry.record.sessions().last().map(PlaySession::end),
            })
            .collect()
    }
}

/// Serialisable view of one player's playtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerSummary {
    pub uuid: Uuid,
    pub names: Vec<String>,
    pub total_seconds: i64,
    pub sessions: usize,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}
