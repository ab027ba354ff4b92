//! Ingestion state shared between the tail loop and readers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};

use crate::playtime::{AggregateStore, FlushReason, ParserContext, PlaySession};

/// The aggregate store and the parser context, always read and written
/// together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestState {
    pub store: AggregateStore,
    pub context: ParserContext,
}

impl IngestState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `text` into this state. Returns whether anyone came or went.
    pub fn parse(&mut self, text: &str) -> bool {
        crate::playtime::parse_lines(text, &mut self.context, &mut self.store)
    }

    /// Close every open session at `now`, as if the input ended there.
    pub fn finish(&mut self, now: DateTime<Utc>) -> bool {
        self.context
            .flush_online(now, FlushReason::EndOfInput, &mut self.store)
    }

    /// A copy of the store with an in-progress session (join until `now`)
    /// for every identified online player.
    ///
    /// The parser context is left untouched.
    #[must_use]
    pub fn with_in_progress_sessions(&self, now: DateTime<Utc>) -> AggregateStore {
        let mut store = self.store.clone();
        for (name, uuid, joined_at) in self.context.online_identities() {
            let duration = (now - joined_at).max(chrono::TimeDelta::zero());
            store.record_session(
                uuid,
                name,
                PlaySession {
                    start: joined_at,
                    duration,
                },
            );
        }
        store
    }
}

/// Lock-guarded handle to the [`IngestState`] of one ingestion run.
///
/// The tail loop is the only writer. Readers hold the lock while they look
/// at both halves so they see a consistent snapshot.
#[derive(Debug, Clone, Default)]
pub struct SharedIngest {
    inner: Arc<Mutex<IngestState>>,
}

impl SharedIngest {
    #[must_use]
    pub fn new(state: IngestState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Lock the state.
    pub async fn lock(&self) -> MutexGuard<'_, IngestState> {
        self.inner.lock().await
    }

    /// Clone the current state.
    pub async fn snapshot(&self) -> IngestState {
        self.inner.lock().await.clone()
    }

    /// Number of players online right now.
    pub async fn online_count(&self) -> usize {
        self.inner.lock().await.context.online_count()
    }
}
