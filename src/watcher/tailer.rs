//! Incremental log file tailer.
//!
//! Reads the bytes appended to the live log since the last read. The file
//! being read is kept open, so a rotated or replaced file is told apart from
//! one truncated in place, and what was appended to it before the switch can
//! still be read.

use std::fs::Metadata;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::error::WatcherError;

/// Identity of a file independent of its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileId {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(not(unix))]
    created: Option<std::time::SystemTime>,
}

impl FileId {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(meta: &Metadata) -> Self {
        Self {
            created: meta.created().ok(),
        }
    }

    /// Identity of the file currently at `path`, if there is one.
    pub async fn of_path(path: &Path) -> Option<Self> {
        tokio::fs::metadata(path).await.ok().map(|m| Self::of(&m))
    }
}

/// Find the regular file in `dir` with identity `id`.
///
/// # Errors
///
/// Returns an error if `dir` cannot be listed.
pub async fn find_file(dir: &Path, id: FileId) -> Result<Option<PathBuf>, WatcherError> {
    let read_dir_err = |source| WatcherError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_dir_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(read_dir_err)? {
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if meta.is_file() && FileId::of(&meta) == id {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

/// Outcome of [`LogTailer::read_appended`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailRead {
    /// The file did not grow.
    Unchanged,
    /// Text appended since the previous read.
    Appended(String),
    /// The same file shrank below the last read position. The position is
    /// reset to the start; the caller decides how to re-read.
    Truncated { previous: u64, len: u64 },
    /// The path now names another file, or nothing. `rest` is what was
    /// appended to the file identified by `previous` since the last read.
    /// The tailer no longer follows it and starts over on the next read.
    Rotated { rest: String, previous: FileId },
}

#[derive(Debug)]
struct OpenFile {
    file: File,
    id: FileId,
}

/// Incremental reader of one path.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
    open: Option<OpenFile>,
}

impl LogTailer {
    /// Create a tailer starting at the beginning of `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            offset: 0,
            open: None,
        }
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identity of the file being followed, once one was opened.
    #[must_use]
    pub fn identity(&self) -> Option<FileId> {
        self.open.as_ref().map(|o| o.id)
    }

    /// Forget the followed file; the next read opens the path from the start.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.open = None;
    }

    /// Read what was appended since the last read.
    ///
    /// A missing file counts as empty when none is followed yet. Bytes that
    /// are not valid UTF-8 are replaced. A line still being written when this
    /// runs is returned as-is.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be opened or read.
    pub async fn read_appended(&mut self) -> Result<TailRead, WatcherError> {
        let current = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Some(FileId::of(&meta)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(WatcherError::PermissionDenied(self.path.clone()));
            }
            Err(e) => return Err(WatcherError::Io(e)),
        };

        match (self.identity(), current) {
            (None, None) => return Ok(TailRead::Unchanged),
            (None, Some(_)) => self.open_path().await?,
            (Some(previous), current) if current != Some(previous) => {
                let rest = self.read_rest().await?;
                tracing::info!(
                    path = %self.path.display(),
                    replaced = current.is_some(),
                    "Followed file no longer at its path"
                );
                return Ok(TailRead::Rotated { rest, previous });
            }
            (Some(_), _) => {}
        }

        let Some(open) = self.open.as_mut() else {
            return Ok(TailRead::Unchanged);
        };
        let len = open.file.metadata().await?.len();
        if len < self.offset {
            let previous = std::mem::take(&mut self.offset);
            tracing::warn!(
                path = %self.path.display(),
                old_offset = previous,
                new_len = len,
                "File truncated, resetting offset to 0"
            );
            return Ok(TailRead::Truncated { previous, len });
        }
        if len == self.offset {
            return Ok(TailRead::Unchanged);
        }
        let text = read_range(&mut open.file, self.offset, len).await?;
        self.offset = len;
        Ok(TailRead::Appended(text))
    }

    /// Read what was appended to the followed file since the last read, then
    /// stop following it. Works after the file was renamed away.
    ///
    /// # Errors
    ///
    /// Returns an error if the open file cannot be read.
    pub async fn read_rest(&mut self) -> Result<String, WatcherError> {
        let from = std::mem::take(&mut self.offset);
        let Some(mut open) = self.open.take() else {
            return Ok(String::new());
        };
        let len = open.file.metadata().await?.len();
        if len <= from {
            return Ok(String::new());
        }
        Ok(read_range(&mut open.file, from, len).await?)
    }

    /// Read the whole file from the start.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn read_from_start(&mut self) -> Result<String, WatcherError> {
        self.reset();
        match self.read_appended().await? {
            TailRead::Appended(text) => Ok(text),
            _ => Ok(String::new()),
        }
    }

    async fn open_path(&mut self) -> Result<(), WatcherError> {
        let file = match File::open(&self.path).await {
            Ok(f) => f,
            // removed since it was looked up
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(WatcherError::PermissionDenied(self.path.clone()));
            }
            Err(e) => return Err(WatcherError::Io(e)),
        };
        let id = FileId::of(&file.metadata().await?);
        self.offset = 0;
        self.open = Some(OpenFile { file, id });
        Ok(())
    }
}

async fn read_range(file: &mut File, from: u64, to: u64) -> std::io::Result<String> {
    file.seek(SeekFrom::Start(from)).await?;
    let mut bytes = Vec::new();
    file.take(to - from).read_to_end(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
