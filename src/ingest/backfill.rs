//! One-shot ingestion of the log directory.

use std::path::Path;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use super::decompress::gunzip_bounded;
use super::error::IngestError;
use super::observer::IngestObserver;
use super::shared::IngestState;
use crate::config::TrackerConfig;
use crate::watcher::{discover_log_files, local_midnight, midnight_of, LogSource, SourceKind};

/// How a backfill run ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillOptions {
    /// Also parse the live log after the archives.
    pub include_live: bool,
    /// Leave online players open so tailing can continue from here.
    /// Otherwise everyone still online is closed out at the current time.
    pub preserve_context: bool,
}

/// Counts from one backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub files_read: usize,
    pub files_skipped: usize,
}

/// Day baseline of the live log: local midnight of its modification day.
///
/// # Errors
///
/// Returns an error if the file's metadata cannot be read.
pub async fn live_baseline(path: &Path, tz: &Tz) -> Result<DateTime<Utc>, IngestError> {
    let read_err = |source| IngestError::Read {
        path: path.to_path_buf(),
        source,
    };
    let modified = tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .map_err(read_err)?;
    Ok(midnight_of(DateTime::<Utc>::from(modified), tz))
}

async fn source_baseline(source: &LogSource, tz: &Tz) -> Result<DateTime<Utc>, IngestError> {
    match source.kind {
        SourceKind::Archive { date, .. } => Ok(local_midnight(date, tz)),
        SourceKind::Live => live_baseline(&source.path, tz).await,
    }
}

async fn read_source(source: &LogSource, limit: usize) -> Result<String, IngestError> {
    let bytes = tokio::fs::read(&source.path)
        .await
        .map_err(|e| IngestError::Read {
            path: source.path.clone(),
            source: e,
        })?;
    let bytes = if source.compressed {
        gunzip_bounded(&source.path, &bytes, limit)?
    } else {
        bytes
    };
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parse every log file in the configured directory into `state`, oldest
/// first.
///
/// A file that cannot be read or decompressed is skipped with a warning.
///
/// # Errors
///
/// Returns an error if the time zone is invalid or the directory cannot be
/// listed.
pub async fn backfill<O: IngestObserver>(
    config: &TrackerConfig,
    state: &mut IngestState,
    options: BackfillOptions,
    observer: &mut O,
) -> Result<BackfillSummary, IngestError> {
    let tz = config.time_zone()?;
    let sources = discover_log_files(&config.log_dir, &config.live_file, options.include_live)?;
    tracing::info!(
        dir = %config.log_dir.display(),
        files = sources.len(),
        "Starting backfill"
    );

    let mut summary = BackfillSummary::default();
    for source in &sources {
        let parsed = async {
            let text = read_source(source, config.max_decompressed_bytes).await?;
            let baseline = source_baseline(source, &tz).await?;
            Ok::<_, IngestError>((text, baseline))
        }
        .await;
        let (text, baseline) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(path = %source.path.display(), error = %e, "Skipping log file");
                summary.files_skipped += 1;
                continue;
            }
        };

        state.context.begin_file(source.file_name(), baseline);
        let changed = state.parse(&text);
        summary.files_read += 1;
        observer.file_completed(&source.path, source.compressed);
        if changed {
            observer.presence_changed(state.context.online_count());
        }
    }

    if !options.preserve_context && state.finish(Utc::now()) {
        observer.presence_changed(0);
    }

    tracing::info!(
        read = summary.files_read,
        skipped = summary.files_skipped,
        players = state.store.len(),
        online = state.context.online_count(),
        "Backfill finished"
    );
    Ok(summary)
}
