//! Chunk availability announcements.
//!
//! A hosting peer broadcasts the chunk names it holds every announce
//! interval. Every peer listens on the same well-known UDP port and folds
//! what it hears into its content index. Delivery is best effort: lost
//! datagrams are simply repeated on the next tick.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};

pub mod broadcast;
pub mod listener;

/// Create a non-blocking UDP socket with SO_BROADCAST and SO_REUSEADDR set,
/// bound to `bind_addr`.
///
/// SO_REUSEADDR lets several peers on one host share the discovery port.
pub(crate) fn make_broadcast_socket(bind_addr: SocketAddr) -> Result<tokio::net::UdpSocket> {
    let domain = if bind_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    if bind_addr.is_ipv4() {
        socket.set_broadcast(true).context("SO_BROADCAST")?;
    }
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .bind(&bind_addr.into())
        .with_context(|| format!("bind({bind_addr})"))?;

    let std_socket: std::net::UdpSocket = socket.into();
    tokio::net::UdpSocket::from_std(std_socket).context("failed to convert to tokio UdpSocket")
}
