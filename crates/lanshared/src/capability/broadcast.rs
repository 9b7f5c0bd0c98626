//! Announcer. Broadcasts the chunk list of the hosted content.
//!
//! Each tick re-lists the chunk directory, so the announcement always
//! reflects what is actually on disk. Nothing is acknowledged.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time;

use lanshare_core::wire::{Announcement, WireError};
use lanshare_services::{ChunkStore, StoreError};

use super::make_broadcast_socket;

/// Broadcast the chunks of `content` found in `store` to `dest` every `interval`.
///
/// Runs until a shutdown signal arrives. Failed iterations are logged and
/// retried on the next tick.
pub async fn broadcast_loop(
    store: ChunkStore,
    content: String,
    dest: SocketAddr,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    let socket = make_broadcast_socket(bind).context("failed to create broadcast socket")?;

    let mut ticker = time::interval(interval);

    tracing::info!(
        content = %content,
        dest = %dest,
        interval_secs = interval.as_secs(),
        "chunk announcer starting"
    );

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("chunk announcer shutting down");
                return Ok(());
            }

            _ = ticker.tick() => {
                match announce_once(&socket, &store, &content, dest).await {
                    Ok(chunks) => tracing::trace!(chunks, "announcement sent"),
                    Err(e) => tracing::warn!(error = %e, "announcement skipped"),
                }
            }
        }
    }
}

/// List, encode, and send one announcement. Returns the number of chunks announced.
pub async fn announce_once(
    socket: &UdpSocket,
    store: &ChunkStore,
    content: &str,
    dest: SocketAddr,
) -> Result<usize, AnnounceError> {
    let chunks = store.list(content)?;
    let count = chunks.len();
    let bytes = Announcement { chunks }.encode()?;
    socket
        .send_to(&bytes, dest)
        .await
        .map_err(AnnounceError::Send)?;
    Ok(count)
}

#[derive(Debug, thiserror::Error)]
pub enum AnnounceError {
    #[error("cannot list chunks: {0}")]
    List(#[from] StoreError),
    #[error(transparent)]
    Encode(#[from] WireError),
    #[error("send failed: {0}")]
    Send(std::io::Error),
}
