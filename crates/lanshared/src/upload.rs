//! Upload server. Answers chunk requests from other peers.
//!
//! One TCP connection carries one request. The handler reads the JSON
//! request, answers with a `ResponseHeader` and, if the chunk is held
//! locally, its bytes, then closes. Each connection runs in its own task;
//! a semaphore caps how many run at once.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use zerocopy::AsBytes;

use lanshare_core::wire::{ChunkId, ChunkRequest, ResponseHeader, WireError, MAX_REQUEST_BYTES};
use lanshare_services::{ChunkStore, Direction, StoreError, TransferLog, TransferLogError};

use crate::stats::TransferStats;

/// Largest slice passed to a single timed write.
const WRITE_SLICE: usize = 64 * 1024;

/// Outcome of one handled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served {
    Sent { chunk: ChunkId, bytes: u64 },
    NotFound { chunk: ChunkId },
}

/// Per-connection request handler. Cheap to clone into each task.
#[derive(Clone)]
pub struct ChunkServer {
    store: ChunkStore,
    log: TransferLog,
    stats: TransferStats,
    request_timeout: Duration,
}

impl ChunkServer {
    pub fn new(
        store: ChunkStore,
        log: TransferLog,
        stats: TransferStats,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            log,
            stats,
            request_timeout,
        }
    }

    /// Handle one connection from start to close.
    pub async fn serve(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<Served, UploadError> {
        let request = tokio::time::timeout(self.request_timeout, read_request(&mut stream))
            .await
            .map_err(|_| UploadError::Timeout(self.request_timeout))??;
        let chunk = request.requested_content;

        let Some(data) = self.store.get(&chunk)? else {
            tracing::info!(chunk = %chunk, peer = %peer, "chunk not found on this server");
            self.send(&mut stream, ResponseHeader::not_found().as_bytes())
                .await?;
            self.finish(&mut stream).await?;
            return Ok(Served::NotFound { chunk });
        };

        let bytes = data.len() as u64;
        self.send(&mut stream, ResponseHeader::found(bytes).as_bytes())
            .await?;
        self.send(&mut stream, &data).await?;
        self.finish(&mut stream).await?;
        drop(data);

        self.log.record(Direction::Upload, &chunk, peer)?;
        self.stats.record_upload(&chunk, peer.ip(), bytes);
        tracing::info!(chunk = %chunk, peer = %peer, bytes, "chunk uploaded");

        Ok(Served::Sent { chunk, bytes })
    }

    /// Write `buf` in slices. Each slice must drain within `request_timeout`,
    /// so a client that stops reading releases its slot.
    async fn send(&self, stream: &mut TcpStream, buf: &[u8]) -> Result<(), UploadError> {
        for piece in buf.chunks(WRITE_SLICE) {
            tokio::time::timeout(self.request_timeout, stream.write_all(piece))
                .await
                .map_err(|_| UploadError::Stalled(self.request_timeout))??;
        }
        Ok(())
    }

    async fn finish(&self, stream: &mut TcpStream) -> Result<(), UploadError> {
        tokio::time::timeout(self.request_timeout, stream.shutdown())
            .await
            .map_err(|_| UploadError::Stalled(self.request_timeout))??;
        Ok(())
    }
}

/// Read until the request parses, the client half-closes, or the size
/// limit is hit.
async fn read_request(stream: &mut TcpStream) -> Result<ChunkRequest, UploadError> {
    let mut buf = Vec::with_capacity(256);
    let mut scratch = [0u8; 1024];

    loop {
        let n = stream.read(&mut scratch).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&scratch[..n]);
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(WireError::RequestTooLarge(buf.len()).into());
        }
        if let Ok(request) = ChunkRequest::decode(&buf) {
            return Ok(request);
        }
    }

    Ok(ChunkRequest::decode(&buf)?)
}

pub struct UploadServer {
    listener: TcpListener,
    handler: ChunkServer,
    limit: Arc<Semaphore>,
    shutdown: broadcast::Receiver<()>,
}

impl UploadServer {
    pub fn new(
        listener: TcpListener,
        handler: ChunkServer,
        max_connections: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            handler,
            limit: Arc::new(Semaphore::new(max_connections.max(1))),
            shutdown,
        }
    }

    /// Accept connections until a shutdown signal arrives.
    ///
    /// A handler failure only ends its own connection.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(
            addr = %self.listener.local_addr()?,
            max_connections = self.limit.available_permits(),
            "upload server starting"
        );

        loop {
            // Wait for a free slot before accepting, so excess clients queue
            // in the kernel backlog instead of as tasks.
            let permit = tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("upload server shutting down");
                    return Ok(());
                }
                permit = self.limit.clone().acquire_owned() => {
                    permit.context("upload semaphore closed")?
                }
            };

            let (stream, peer) = tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("upload server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                }
            };

            let handler = self.handler.clone();
            tokio::spawn(async move {
                let _permit = permit;
                match handler.serve(stream, peer).await {
                    Ok(served) => tracing::trace!(?served, "upload connection closed"),
                    Err(e) => tracing::warn!(peer = %peer, error = %e, "upload request failed"),
                }
            });
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("no complete request within {0:?}")]
    Timeout(Duration),
    #[error("client stopped reading for {0:?}")]
    Stalled(Duration),
    #[error("bad request: {0}")]
    Request(#[from] WireError),
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Log(#[from] TransferLogError),
}
