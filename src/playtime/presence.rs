//! Presence status derived from the online player count.

use crate::config::StatusConfig;

/// Tracks the last reported player count and renders status strings.
#[derive(Debug, Clone)]
pub struct PresenceStatus {
    config: StatusConfig,
    last_count: usize,
}

impl PresenceStatus {
    /// Start from zero players online.
    #[must_use]
    pub fn new(config: StatusConfig) -> Self {
        Self {
            config,
            last_count: 0,
        }
    }

    /// Status string for `count` players. Empty means "no status".
    #[must_use]
    pub fn render(&self, count: usize) -> String {
        match count {
            0 => self.config.empty.clone(),
            1 => self.config.one.clone(),
            n => self.config.render_multi(n),
        }
    }

    /// Record a new count; returns the status to show if it changed.
    pub fn update(&mut self, count: usize) -> Option<String> {
        if count == self.last_count {
            return None;
        }
        self.last_count = count;
        Some(self.render(count))
    }

    #[must_use]
    pub fn last_count(&self) -> usize {
        self.last_count
    }
}
