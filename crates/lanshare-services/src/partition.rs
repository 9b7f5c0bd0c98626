//! Partitioner: splits a hosted file into `CHUNK_COUNT` chunk files.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use lanshare_core::wire::{ChunkId, ChunkIdError, CHUNK_COUNT};

use crate::store::{ChunkStore, StoreError};

/// Bytes per chunk for a file of the given length.
///
/// Every chunk but the last is exactly this long. The last holds whatever
/// remains, which may be less or, for very small files, nothing at all.
pub fn chunk_size(file_len: u64) -> u64 {
    file_len.div_ceil(CHUNK_COUNT as u64)
}

/// Content name under which a file is hosted: its file name.
pub fn content_name(path: &Path) -> Result<String, PartitionError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PartitionError::NoFileName(path.to_path_buf()))?;
    lanshare_core::wire::validate_content_name(name)?;
    Ok(name.to_string())
}

/// Split `source` into chunks and write them into `store`.
///
/// Returns the chunk ids in index order. Re-running on the same file
/// rewrites identical chunks.
pub fn partition(source: &Path, store: &ChunkStore) -> Result<Vec<ChunkId>, PartitionError> {
    let content = content_name(source)?;
    let ids = ChunkId::all(&content)?;

    let mut file =
        File::open(source).map_err(|e| PartitionError::Read(source.to_path_buf(), e))?;
    let file_len = file
        .metadata()
        .map_err(|e| PartitionError::Read(source.to_path_buf(), e))?
        .len();
    let size = chunk_size(file_len);

    for id in &ids {
        let written = store.put_from_reader(id, &mut (&mut file).take(size))?;
        let expected = size.min(file_len - (id.index() as u64 * size).min(file_len));
        if written != expected {
            return Err(PartitionError::Read(
                source.to_path_buf(),
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{id}: expected {expected} bytes, read {written}"),
                ),
            ));
        }
    }

    tracing::info!(
        content = %content,
        bytes = file_len,
        chunk_size = size,
        chunks = ids.len(),
        dir = %store.root().display(),
        "file divided into chunks"
    );

    Ok(ids)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("{0} has no usable file name")]
    NoFileName(PathBuf),
    #[error("file name cannot be hosted: {0}")]
    InvalidName(#[from] ChunkIdError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
