//! Downloader: fetch every chunk of a content from the peers the index
//! names, then reassemble.
//!
//! Peers for a chunk are tried in the order the index learned them. The
//! first peer that returns the full chunk wins; refused connections, timeouts,
//! `NotFound` answers and short bodies all move on to the next peer.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use zerocopy::FromBytes;

use lanshare_core::wire::{
    validate_content_name, ChunkId, ChunkIdError, ChunkRequest, ResponseHeader, ResponseStatus,
    WireError,
};
use lanshare_services::{
    part_path, reassemble, ContentIndex, Direction, ReassembleError, TransferLog,
};

use crate::stats::TransferStats;

const READ_BUF: usize = 64 * 1024;

pub struct Downloader {
    index: ContentIndex,
    log: TransferLog,
    stats: TransferStats,
    downloads_dir: PathBuf,
    upload_port: u16,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl Downloader {
    pub fn new(
        index: ContentIndex,
        log: TransferLog,
        stats: TransferStats,
        downloads_dir: impl Into<PathBuf>,
        upload_port: u16,
    ) -> Self {
        Self {
            index,
            log,
            stats,
            downloads_dir: downloads_dir.into(),
            upload_port,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Fetch all chunks of `content` and write the reassembled file to
    /// `<downloads>/<content>`.
    ///
    /// Chunks that no peer could supply are reported together in
    /// [`DownloadError::Incomplete`]; in that case no output file is written,
    /// but the chunks that did arrive stay on disk.
    pub async fn download(&self, content: &str) -> Result<PathBuf, DownloadError> {
        validate_content_name(content)?;
        let chunks = ChunkId::all(content)?;

        fs::create_dir_all(&self.downloads_dir)
            .await
            .map_err(|e| DownloadError::CreateDir(self.downloads_dir.clone(), e))?;

        tracing::info!(content, "download starting");

        let mut missing = Vec::new();
        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if !self.fetch_from_any(&chunk).await {
                missing.push(chunk.clone());
            }
            let path = part_path(&self.downloads_dir, &chunk);
            parts.push((chunk, path));
        }

        if let Err(e) = self.index.save().await {
            tracing::warn!(error = %e, "failed to persist content index");
        }

        if !missing.is_empty() {
            tracing::warn!(
                content,
                missing = missing.len(),
                "download incomplete, not reassembling"
            );
            return Err(DownloadError::Incomplete {
                content: content.to_string(),
                missing,
            });
        }

        let output = self.downloads_dir.join(content);
        let bytes = tokio::task::spawn_blocking({
            let output = output.clone();
            move || reassemble(&parts, &output)
        })
        .await
        .map_err(|e| DownloadError::Join(e.to_string()))??;

        tracing::info!(content, bytes, output = %output.display(), "download complete");
        Ok(output)
    }

    /// Try each known peer for `chunk` in turn. Returns whether one succeeded.
    async fn fetch_from_any(&self, chunk: &ChunkId) -> bool {
        let peers = self.index.peers(chunk);
        if peers.is_empty() {
            tracing::warn!(chunk = %chunk, "no known peer holds this chunk");
            return false;
        }

        for peer in peers {
            match self.fetch_chunk(chunk, peer).await {
                Ok(bytes) => {
                    if let Err(e) = self.log.record(Direction::Download, chunk, peer) {
                        tracing::warn!(chunk = %chunk, error = %e, "failed to write download log");
                    }
                    self.stats.record_download(chunk, peer, bytes);
                    tracing::info!(chunk = %chunk, peer = %peer, bytes, "chunk downloaded");
                    return true;
                }
                Err(PeerError::Storage(e)) => {
                    // Another peer will not fix a local disk problem.
                    tracing::error!(chunk = %chunk, error = %e, "cannot store chunk");
                    return false;
                }
                Err(e) => {
                    tracing::warn!(chunk = %chunk, peer = %peer, error = %e, "peer failed, trying next");
                }
            }
        }

        tracing::warn!(chunk = %chunk, "every known peer failed");
        false
    }

    /// Fetch one chunk from one peer into its part file. Returns the body size.
    ///
    /// `request_timeout` bounds each read and write, not the whole transfer,
    /// so a large chunk may take as long as it needs while bytes keep coming.
    pub async fn fetch_chunk(&self, chunk: &ChunkId, peer: IpAddr) -> Result<u64, PeerError> {
        let addr = SocketAddr::new(peer, self.upload_port);

        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::Timeout)?
            .map_err(PeerError::Connect)?;

        let expected = self.request(&mut stream, chunk).await?;

        let final_path = part_path(&self.downloads_dir, chunk);
        let mut tmp_name = final_path.clone().into_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let received = match self.receive_body(&mut stream, &tmp_path, expected).await {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(PeerError::Storage(e));
        }
        Ok(received)
    }

    /// Send the request and read the response header. Returns the body
    /// length of a `Found` response.
    async fn request(&self, stream: &mut TcpStream, chunk: &ChunkId) -> Result<u64, PeerError> {
        let request = ChunkRequest {
            requested_content: chunk.clone(),
        }
        .encode()?;
        self.idle(stream.write_all(&request)).await?;
        self.idle(stream.shutdown()).await?;

        let mut raw = [0u8; ResponseHeader::SIZE];
        self.idle(stream.read_exact(&mut raw)).await?;
        let header =
            ResponseHeader::read_from(&raw[..]).ok_or_else(|| PeerError::Truncated {
                expected: ResponseHeader::SIZE as u64,
                received: raw.len() as u64,
            })?;

        match header.status()? {
            ResponseStatus::Found => Ok(header.body_len()),
            ResponseStatus::NotFound => Err(PeerError::NotFound),
        }
    }

    /// Copy exactly `expected` body bytes into `path`.
    async fn receive_body(
        &self,
        stream: &mut TcpStream,
        path: &Path,
        expected: u64,
    ) -> Result<u64, PeerError> {
        let mut file = File::create(path).await.map_err(PeerError::Storage)?;
        let mut buf = vec![0u8; READ_BUF];
        let mut received = 0u64;

        while received < expected {
            let want = (expected - received).min(buf.len() as u64) as usize;
            let n = self.idle(stream.read(&mut buf[..want])).await?;
            if n == 0 {
                return Err(PeerError::Truncated { expected, received });
            }
            file.write_all(&buf[..n])
                .await
                .map_err(PeerError::Storage)?;
            received += n as u64;
        }

        file.sync_all().await.map_err(PeerError::Storage)?;
        Ok(received)
    }

    /// Run one socket operation under the idle timeout.
    async fn idle<T>(
        &self,
        op: impl std::future::Future<Output = std::io::Result<T>>,
    ) -> Result<T, PeerError> {
        tokio::time::timeout(self.request_timeout, op)
            .await
            .map_err(|_| PeerError::Timeout)?
            .map_err(PeerError::Io)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why one peer could not supply one chunk.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("connect failed: {0}")]
    Connect(std::io::Error),
    #[error("timed out")]
    Timeout,
    #[error("connection error: {0}")]
    Io(std::io::Error),
    #[error("peer does not have the chunk")]
    NotFound,
    #[error("protocol error: {0}")]
    Protocol(#[from] WireError),
    #[error("body truncated: expected {expected} bytes, got {received}")]
    Truncated { expected: u64, received: u64 },
    #[error("local storage error: {0}")]
    Storage(std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("invalid content name: {0}")]
    InvalidName(#[from] ChunkIdError),
    #[error("cannot create {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("download of {content} incomplete, missing chunks: {}", join(.missing))]
    Incomplete { content: String, missing: Vec<ChunkId> },
    #[error(transparent)]
    Reassemble(#[from] ReassembleError),
    #[error("reassembly task failed: {0}")]
    Join(String),
}

fn join(ids: &[ChunkId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
