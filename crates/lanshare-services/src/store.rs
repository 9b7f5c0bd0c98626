//! Chunk store: the directory of chunk files a host serves and announces.
//!
//! Layout is flat: one file per chunk, named by its chunk id:
//!   <root>/{content}_{index}
//!
//! Files are written once by the partitioner and never mutated afterwards.
//! Anything in the directory whose name does not parse as a chunk id is
//! ignored.

use std::fs;
use std::io::{self, Read};
use std::ops::Deref;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use lanshare_core::wire::ChunkId;

/// Chunk directory handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

/// Read-only view of a stored chunk.
///
/// Non-empty chunks are memory-mapped so uploads stream straight from the
/// page cache. Zero-length files cannot be mapped and get their own variant.
pub enum MappedChunk {
    Empty,
    Mapped(Mmap),
}

impl Deref for MappedChunk {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            MappedChunk::Empty => &[],
            MappedChunk::Mapped(m) => m,
        }
    }
}

impl ChunkStore {
    /// Open a store rooted at the given directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::CreateDir(root.clone(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of a chunk, whether or not it exists.
    pub fn path(&self, id: &ChunkId) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub fn has(&self, id: &ChunkId) -> bool {
        self.path(id).is_file()
    }

    /// Map a chunk for reading. Returns None if it is not stored.
    pub fn get(&self, id: &ChunkId) -> Result<Option<MappedChunk>, StoreError> {
        let path = self.path(id);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Read(path, e)),
        };

        let len = file
            .metadata()
            .map_err(|e| StoreError::Read(path.clone(), e))?
            .len();
        if len == 0 {
            return Ok(Some(MappedChunk::Empty));
        }

        // Safety: chunk files are never modified after the atomic rename in put().
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| StoreError::Read(path, e))?;
        Ok(Some(MappedChunk::Mapped(mmap)))
    }

    /// Store a chunk, replacing any existing file of the same name.
    pub fn put(&self, id: &ChunkId, data: &[u8]) -> Result<(), StoreError> {
        self.put_from_reader(id, &mut &data[..]).map(|_| ())
    }

    /// Stream a chunk from `reader` until EOF. Returns the bytes written.
    ///
    /// Writes are atomic: temp file, fsync, rename. Readers never observe a
    /// partially written chunk, and a failed write leaves no temp file.
    pub fn put_from_reader(&self, id: &ChunkId, reader: &mut impl Read) -> Result<u64, StoreError> {
        let path = self.path(id);
        // Leading dot and suffix keep the temp name from parsing as a chunk id.
        let tmp_path = self.root.join(format!(".{id}.tmp"));

        let written = write_synced(&tmp_path, reader).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Write(tmp_path.clone(), e)
        })?;

        fs::rename(&tmp_path, &path).map_err(|e| StoreError::Write(path.clone(), e))?;

        tracing::trace!(chunk = %id, bytes = written, "chunk stored");
        Ok(written)
    }

    /// Chunks of one content currently on disk, in index order.
    pub fn list(&self, content: &str) -> Result<Vec<ChunkId>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::List(self.root.clone(), e))?;

        let mut chunks: Vec<ChunkId> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().to_str()?.parse::<ChunkId>().ok())
            .filter(|id| id.content() == content)
            .collect();
        chunks.sort();
        Ok(chunks)
    }
}

fn write_synced(path: &Path, reader: &mut impl Read) -> io::Result<u64> {
    let mut file = fs::File::create(path)?;
    let written = io::copy(reader, &mut file)?;
    file.sync_all()?;
    Ok(written)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create chunk directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("failed to read chunk {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to write chunk {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("failed to list chunk directory {0}: {1}")]
    List(PathBuf, std::io::Error),
}
