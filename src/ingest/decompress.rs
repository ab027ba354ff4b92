//! Bounded gzip decompression.

use std::io::Read;
use std::path::Path;

use flate2::read::MultiGzDecoder;

use super::error::IngestError;

/// Decompress a gzip archive read from `path`, refusing output over `limit`.
///
/// Concatenated gzip members are decoded as one stream.
///
/// # Errors
///
/// Returns [`IngestError::Decompress`] for a corrupt stream and
/// [`IngestError::TooLarge`] when the output would exceed `limit`.
pub fn gunzip_bounded(path: &Path, data: &[u8], limit: usize) -> Result<Vec<u8>, IngestError> {
    let bound = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let mut out = Vec::new();
    MultiGzDecoder::new(data)
        .take(bound)
        .read_to_end(&mut out)
        .map_err(|source| IngestError::Decompress {
            path: path.to_path_buf(),
            source,
        })?;
    if out.len() > limit {
        return Err(IngestError::TooLarge {
            path: path.to_path_buf(),
            limit,
        });
    }
    Ok(out)
}
