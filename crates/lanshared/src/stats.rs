//! Transfer tracking: which chunks went to and came from which peers.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::Instant;

use lanshare_core::wire::ChunkId;

/// Per-chunk upload summary. Size is bounded by the number of distinct peers.
#[derive(Debug)]
struct UploadRecord {
    count: usize,
    peers: HashSet<IpAddr>,
    last_served: Instant,
}

/// Shared counters for uploads and downloads. Cheap to clone.
#[derive(Clone, Default)]
pub struct TransferStats {
    uploads: Arc<DashMap<ChunkId, UploadRecord>>,
    // chunk -> (peer, received_at)
    downloads: Arc<DashMap<ChunkId, (IpAddr, Instant)>>,
    bytes_up: Arc<AtomicU64>,
    bytes_down: Arc<AtomicU64>,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a chunk served to a peer.
    pub fn record_upload(&self, chunk: &ChunkId, peer: IpAddr, bytes: u64) {
        let now = Instant::now();
        let mut record = self
            .uploads
            .entry(chunk.clone())
            .or_insert_with(|| UploadRecord {
                count: 0,
                peers: HashSet::new(),
                last_served: now,
            });
        record.count += 1;
        record.peers.insert(peer);
        record.last_served = now;
        drop(record);
        self.bytes_up.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a chunk fetched from a peer. A later fetch of the same chunk
    /// replaces the earlier record.
    pub fn record_download(&self, chunk: &ChunkId, peer: IpAddr, bytes: u64) {
        self.downloads.insert(chunk.clone(), (peer, Instant::now()));
        self.bytes_down.fetch_add(bytes, Ordering::Relaxed);
    }

    /// How many times this chunk has been served.
    pub fn upload_count(&self, chunk: &ChunkId) -> usize {
        self.uploads.get(chunk).map(|r| r.count).unwrap_or(0)
    }

    /// How many distinct peers this chunk has been served to.
    pub fn upload_peers(&self, chunk: &ChunkId) -> usize {
        self.uploads.get(chunk).map(|r| r.peers.len()).unwrap_or(0)
    }

    /// The peer this chunk was last fetched from.
    pub fn downloaded_from(&self, chunk: &ChunkId) -> Option<IpAddr> {
        self.downloads.get(chunk).map(|v| v.0)
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    /// Log totals, plus any chunk that several distinct peers pulled from us.
    pub fn print_stats(&self) {
        let served: usize = self.uploads.iter().map(|e| e.value().count).sum();
        if served == 0 && self.downloads.is_empty() {
            return;
        }

        tracing::info!(
            chunks_served = served,
            bytes_uploaded = self.bytes_uploaded(),
            chunks_fetched = self.downloads.len(),
            bytes_downloaded = self.bytes_downloaded(),
            "transfer stats"
        );

        for entry in self.uploads.iter() {
            let record = entry.value();
            if record.peers.len() > 1 {
                tracing::debug!(
                    chunk = %entry.key(),
                    unique_peers = record.peers.len(),
                    total_uploads = record.count,
                    peers = ?record.peers,
                    secs_since_last = record.last_served.elapsed().as_secs(),
                    "chunk served to several peers"
                );
            }
        }
    }
}
