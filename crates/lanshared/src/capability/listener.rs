//! Discovery listener.
//!
//! Receives announcements on the discovery port and records, for every
//! announced chunk, that the datagram's source address holds it. The
//! content index is persisted after every datagram that taught us something.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use lanshare_core::wire::{Announcement, WireError};
use lanshare_services::ContentIndex;

use super::make_broadcast_socket;

/// Big enough for any UDP payload.
const RECV_BUF: usize = 64 * 1024;

/// Bind the discovery socket. Peers on the same host can share the port.
pub fn bind_discovery_socket(addr: SocketAddr) -> Result<UdpSocket> {
    make_broadcast_socket(addr).context("failed to create discovery socket")
}

pub struct DiscoveryListener {
    socket: UdpSocket,
    index: ContentIndex,
    shutdown: broadcast::Receiver<()>,
}

impl DiscoveryListener {
    pub fn new(socket: UdpSocket, index: ContentIndex, shutdown: broadcast::Receiver<()>) -> Self {
        Self {
            socket,
            index,
            shutdown,
        }
    }

    /// Listen until a shutdown signal arrives. Bad datagrams are dropped.
    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; RECV_BUF];

        tracing::info!(
            addr = %self.socket.local_addr()?,
            "discovery listener starting"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("discovery listener shutting down");
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };

                    match self.handle_datagram(&buf[..len], from) {
                        Ok(0) => {}
                        Ok(new_pairs) => {
                            tracing::debug!(peer = %from.ip(), new_pairs, "content index updated");
                            if let Err(e) = self.index.save().await {
                                tracing::warn!(error = %e, "failed to persist content index");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(peer = %from, error = %e, "dropping malformed announcement");
                        }
                    }
                }
            }
        }
    }

    /// Fold one datagram into the index. Returns how many (peer, chunk)
    /// pairs were seen for the first time.
    pub fn handle_datagram(&self, data: &[u8], from: SocketAddr) -> Result<usize, WireError> {
        let announcement = Announcement::decode(data)?;
        let peer = from.ip();

        let mut new_pairs = 0;
        for chunk in announcement.chunks {
            let label = chunk.to_string();
            if self.index.insert(chunk, peer) {
                tracing::info!(peer = %peer, chunk = %label, "peer has chunk");
                new_pairs += 1;
            }
        }
        Ok(new_pairs)
    }
}
