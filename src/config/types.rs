//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Which notification backend the change watcher uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WatcherBackend {
    /// The OS facility (inotify, `ReadDirectoryChangesW`, `FSEvents`).
    #[default]
    Native,
    /// Periodic stat polling, for network filesystems.
    Polling,
}

/// Change watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub backend: WatcherBackend,
    /// Scan interval of the polling backend.
    pub poll_interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            backend: WatcherBackend::Native,
            poll_interval_ms: 1000,
        }
    }
}

impl WatcherConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Presence strings shown for an online player count.
///
/// Empty strings mean "no status".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatusConfig {
    /// Shown when nobody is online.
    pub empty: String,
    /// Shown when exactly one player is online.
    pub one: String,
    /// Shown for two or more players; `{}` is replaced by the count.
    pub multi: String,
}

impl StatusConfig {
    /// Check that `multi` (when set) is a `format!`-style template with
    /// exactly one `{}` placeholder. `{{` and `}}` are literal braces.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidStatusFormat`] otherwise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.multi.is_empty() || split_placeholder(&self.multi).is_some() {
            Ok(())
        } else {
            Err(ConfigError::InvalidStatusFormat(self.multi.clone()))
        }
    }

    /// Render `multi` for `count` players.
    ///
    /// An invalid template renders as-is; `validate` rejects those up front.
    #[must_use]
    pub fn render_multi(&self, count: usize) -> String {
        match split_placeholder(&self.multi) {
            Some((before, after)) => format!("{before}{count}{after}"),
            None => self.multi.clone(),
        }
    }
}

/// Split a template with one `{}` into the text around it, unescaping
/// `{{` and `}}`. Any other brace makes the template invalid.
fn split_placeholder(template: &str) -> Option<(String, String)> {
    let mut parts = vec![String::new()];
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('{', Some(&'{')) | ('}', Some(&'}')) => {
                chars.next();
                parts.last_mut()?.push(c);
            }
            ('{', Some(&'}')) => {
                chars.next();
                parts.push(String::new());
            }
            ('{' | '}', _) => return None,
            _ => parts.last_mut()?.push(c),
        }
    }
    let [before, after]: [String; 2] = parts.try_into().ok()?;
    Some((before, after))
}

/// Top-level tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Directory holding the live log and its dated archives.
    pub log_dir: PathBuf,
    /// Name of the live, growing log file.
    pub live_file: String,
    /// IANA time zone the server writes timestamps in.
    pub timezone: String,
    /// Upper bound on the decompressed size of one archive.
    pub max_decompressed_bytes: usize,
    /// Sleep between polls when no event is pending.
    pub poll_backoff_ms: u64,
    /// How often a failed watcher is re-created before giving up.
    pub max_watcher_restarts: u32,
    /// Pause before re-creating a failed watcher.
    pub watcher_restart_delay_ms: u64,
    pub watcher: WatcherConfig,
    pub status: StatusConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            live_file: "latest.log".to_string(),
            timezone: "UTC".to_string(),
            max_decompressed_bytes: 16 * 1024 * 1024,
            poll_backoff_ms: 100,
            max_watcher_restarts: 3,
            watcher_restart_delay_ms: 1000,
            watcher: WatcherConfig::default(),
            status: StatusConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Resolve the configured time zone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownTimezone`] if `timezone` is not an IANA id.
    pub fn time_zone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::UnknownTimezone {
                name: self.timezone.clone(),
                reason: e.to_string(),
            })
    }

    #[must_use]
    pub fn poll_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_ms)
    }

    #[must_use]
    pub fn watcher_restart_delay(&self) -> Duration {
        Duration::from_millis(self.watcher_restart_delay_ms)
    }

    /// Path of the live log file.
    #[must_use]
    pub fn live_path(&self) -> PathBuf {
        self.log_dir.join(&self.live_file)
    }

    /// Validate every field that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.time_zone()?;
        self.status.validate()?;
        if self.live_file.is_empty() {
            return Err(ConfigError::EmptyLiveFile);
        }
        Ok(())
    }
}
