//! Content index: which peers are believed to hold which chunks.
//!
//! Populated by the discovery listener from announcements and read by the
//! downloader. Both hold clones of the same `ContentIndex`, so there is one
//! in-memory owner of the mapping. The snapshot file is a persistence target
//! only: every `save()` rewrites it wholesale, and saves are serialized so
//! two writers can never interleave partial snapshots.
//!
//! Entries never expire. A peer that went offline stays listed.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use lanshare_core::wire::ChunkId;

/// Point-in-time copy of the index, ordered by chunk id.
/// This is also the exact shape of the snapshot file.
pub type IndexSnapshot = BTreeMap<ChunkId, Vec<IpAddr>>;

/// Shared handle to the content index. Cheap to clone.
#[derive(Clone)]
pub struct ContentIndex {
    /// chunk -> peers in order of first sighting, no duplicates
    entries: Arc<DashMap<ChunkId, Vec<IpAddr>>>,
    snapshot_path: Arc<PathBuf>,
    write_lock: Arc<Mutex<()>>,
}

impl ContentIndex {
    /// Create an empty index persisted to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            snapshot_path: Arc::new(path.into()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Read the snapshot at `path`.
    ///
    /// Fails with `Missing` or `Corrupt` when there is nothing usable on disk;
    /// both are recoverable and mean "start empty".
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::Missing(path))
            }
            Err(e) => return Err(IndexError::Read(path, e)),
        };
        let snapshot: IndexSnapshot =
            serde_json::from_str(&text).map_err(|e| IndexError::Corrupt(path.clone(), e))?;

        let index = Self::new(path);
        for (chunk, peers) in snapshot {
            for peer in peers {
                index.insert(chunk.clone(), peer);
            }
        }
        Ok(index)
    }

    /// Load the snapshot if there is a usable one, otherwise start empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load(&path) {
            Ok(index) => {
                tracing::info!(path = %path.display(), chunks = index.len(), "content index loaded");
                index
            }
            Err(IndexError::Missing(_)) => {
                tracing::debug!(path = %path.display(), "no content index snapshot, starting empty");
                Self::new(path)
            }
            Err(e) => {
                tracing::warn!(error = %e, "content index unusable, starting empty");
                Self::new(path)
            }
        }
    }

    /// Record that `peer` holds `chunk`. Returns true if this pair is new.
    pub fn insert(&self, chunk: ChunkId, peer: IpAddr) -> bool {
        let mut peers = self.entries.entry(chunk).or_default();
        if peers.contains(&peer) {
            return false;
        }
        peers.push(peer);
        true
    }

    /// Candidate peers for a chunk, in order of first sighting.
    pub fn peers(&self, chunk: &ChunkId) -> Vec<IpAddr> {
        self.entries
            .get(chunk)
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Number of chunks with at least one known peer.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Persist the whole index, replacing the previous snapshot atomically.
    pub async fn save(&self) -> Result<(), IndexError> {
        let _guard = self.write_lock.lock().await;

        let path = self.snapshot_path.as_path();
        let bytes = serde_json::to_vec(&self.snapshot()).map_err(IndexError::Serialize)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| IndexError::Write(path.to_path_buf(), e))?;
            }
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| IndexError::Write(tmp_path.clone(), e))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| IndexError::Write(path.to_path_buf(), e))?;

        tracing::trace!(path = %path.display(), chunks = self.len(), "content index saved");
        Ok(())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("no content index snapshot at {0}")]
    Missing(PathBuf),
    #[error("failed to read content index {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("content index {0} is corrupt: {1}")]
    Corrupt(PathBuf, serde_json::Error),
    #[error("failed to serialize content index: {0}")]
    Serialize(serde_json::Error),
    #[error("failed to write content index {0}: {1}")]
    Write(PathBuf, std::io::Error),
}
