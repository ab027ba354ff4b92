//! Log file discovery.
//!
//! Lists the dated archives and the live log in a server log directory, in
//! the order they were written.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;

use super::error::WatcherError;

/// Where a log file sits in the rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// The file the server is currently writing.
    Live,
    /// A rotated `YYYY-MM-DD[-N]` archive.
    Archive {
        date: NaiveDate,
        sequence: Option<u32>,
    },
}

/// One discovered log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSource {
    pub path: PathBuf,
    pub kind: SourceKind,
    pub compressed: bool,
}

impl LogSource {
    /// File name without directory.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File name without the `.log` / `.log.gz` extension.
    ///
    /// `2024-01-01-1.log` and `2024-01-01-1.log.gz` share the base name
    /// `2024-01-01-1`.
    #[must_use]
    pub fn base_name(&self) -> String {
        base_name(&self.file_name()).to_string()
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.kind == SourceKind::Live
    }

    fn sort_key(&self) -> (u8, Option<NaiveDate>, Option<u32>, bool) {
        match self.kind {
            SourceKind::Archive { date, sequence } => (0, Some(date), sequence, self.compressed),
            SourceKind::Live => (1, None, None, self.compressed),
        }
    }
}

/// Strip the `.log.gz` or `.log` extension from a file name.
#[must_use]
pub fn base_name(file_name: &str) -> &str {
    file_name
        .strip_suffix(".log.gz")
        .or_else(|| file_name.strip_suffix(".log"))
        .unwrap_or(file_name)
}

/// Result of checking one file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogName {
    /// Not a `.log` / `.log.gz` file; ignored silently.
    NotLog,
    /// A log extension but neither the live name nor a dated archive name.
    Malformed,
    /// A usable log file.
    Valid { kind: SourceKind, compressed: bool },
}

static ARCHIVE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2})(?:-(\d+))?\.log(\.gz)?$").expect("valid regex")
});

/// Classify a file name found in the log directory.
#[must_use]
pub fn classify_log_name(file_name: &str, live_name: &str) -> LogName {
    if !(file_name.ends_with(".log") || file_name.ends_with(".log.gz")) {
        return LogName::NotLog;
    }
    if file_name == live_name {
        return LogName::Valid {
            kind: SourceKind::Live,
            compressed: false,
        };
    }
    let Some(caps) = ARCHIVE_NAME_RE.captures(file_name) else {
        return LogName::Malformed;
    };

    let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let (Some(year), Some(month), Some(day)) = (number(1), number(2), number(3)) else {
        return LogName::Malformed;
    };
    let Some(date) = i32::try_from(year)
        .ok()
        .and_then(|y| NaiveDate::from_ymd_opt(y, month, day))
    else {
        return LogName::Malformed;
    };
    let sequence = match caps.get(4) {
        Some(m) => match m.as_str().parse::<u32>() {
            Ok(n) => Some(n),
            Err(_) => return LogName::Malformed,
        },
        None => None,
    };

    LogName::Valid {
        kind: SourceKind::Archive { date, sequence },
        compressed: caps.get(5).is_some(),
    }
}

/// Discover log files in `dir`, oldest first, live file last.
///
/// Files with a log extension but an unexpected name, and archives whose
/// base name was already seen, are skipped with a warning.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub fn discover_log_files(
    dir: &Path,
    live_name: &str,
    include_live: bool,
) -> Result<Vec<LogSource>, WatcherError> {
    let read_dir_err = |source| WatcherError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };
    let entries = std::fs::read_dir(dir).map_err(read_dir_err)?;

    let mut sources = Vec::new();
    for entry in entries {
        let path = entry.map_err(read_dir_err)?.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!(path = %path.display(), "Skipping log file with a non UTF-8 name");
            continue;
        };
        match classify_log_name(file_name, live_name) {
            LogName::NotLog => {}
            LogName::Malformed => {
                tracing::warn!(
                    path = %path.display(),
                    "Skipping log file with unexpected name (expected {live_name} or YYYY-MM-DD-N.log[.gz])"
                );
            }
            LogName::Valid { kind, compressed } => {
                if kind == SourceKind::Live && !include_live {
                    continue;
                }
                sources.push(LogSource {
                    path,
                    kind,
                    compressed,
                });
            }
        }
    }

    sources.sort_by_key(LogSource::sort_key);
    sources.dedup_by(|later, first| {
        let duplicate = later.kind == first.kind;
        if duplicate {
            tracing::warn!(
                path = %later.path.display(),
                kept = %first.path.display(),
                "Skipping duplicate log file"
            );
        }
        duplicate
    });

    tracing::debug!(dir = %dir.display(), count = sources.len(), "Discovered log files");
    Ok(sources)
}

/// The instant local midnight starts `date` in `tz`.
///
/// If midnight falls in a DST gap, the first instant after the gap is used.
#[must_use]
pub fn local_midnight(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    (0..3)
        .find_map(|h| {
            tz.from_local_datetime(&(midnight + TimeDelta::hours(h)))
                .earliest()
        })
        .map_or_else(|| midnight.and_utc(), |at| at.with_timezone(&Utc))
}

/// Local midnight of the day containing `instant` in `tz`.
#[must_use]
pub fn midnight_of(instant: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
    local_midnight(instant.with_timezone(tz).date_naive(), tz)
}
