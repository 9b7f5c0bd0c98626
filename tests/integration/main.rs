//! lanshare integration test harness.
//!
//! Every test runs two or more in-process peers on loopback. Peers share
//! one upload port and tell each other apart by loopback address
//! (127.0.0.1, 127.0.0.5, ...), which Linux routes without extra setup.
//! Each peer gets its own discovery port so announcements can be aimed at
//! a single peer.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};

use lanshare_core::config::LanshareConfig;

mod failover;
mod transfer;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Loopback address of the hosting peer.
pub const HOST_IP: &str = "127.0.0.1";
/// Loopback address of the downloading peer.
pub const FETCHER_IP: &str = "127.0.0.5";
/// Loopback address nobody listens on.
pub const DEAD_IP: &str = "127.0.0.3";

pub fn ip(s: &str) -> IpAddr {
    s.parse().expect("valid ip literal")
}

/// A TCP port that is currently free on every interface.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("0.0.0.0:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

/// Config for a loopback peer: explicit bind address, ephemeral discovery
/// port, fast announcements, short timeouts.
pub fn peer_config(work_dir: &Path, bind_ip: &str, upload_port: u16) -> LanshareConfig {
    let mut config = LanshareConfig::default();
    config.network.bind_ip = bind_ip.to_string();
    config.network.broadcast_addr = HOST_IP.to_string();
    config.network.discovery_port = 0;
    config.network.upload_port = upload_port;
    config.network.announce_interval_secs = 1;
    config.transfer.connect_timeout_secs = 2;
    config.transfer.request_timeout_secs = 10;
    config.storage.work_dir = work_dir.to_path_buf();
    config
}

/// Write `len` bytes of a non-repeating pattern to `dir/name`.
pub fn write_test_file(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
    std::fs::create_dir_all(dir).expect("create share dir");
    let data: Vec<u8> = (0..len)
        .map(|i| ((i as u64).wrapping_mul(2654435761) >> 13) as u8)
        .collect();
    let path = dir.join(name);
    std::fs::write(&path, &data).expect("write test file");
    (path, data)
}

/// Poll `cond` every 20ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, what: &str, cond: impl Fn() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

pub fn loopback(ip_str: &str, port: u16) -> SocketAddr {
    SocketAddr::new(ip(ip_str), port)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn loopback_aliases_are_bindable() {
    for addr in [HOST_IP, FETCHER_IP] {
        let bound = std::net::TcpListener::bind((ip(addr), 0));
        assert!(bound.is_ok(), "cannot bind {addr}: {:?}", bound.err());
    }
}

#[test]
fn free_port_is_reusable_immediately() {
    let port = free_port();
    assert_ne!(port, 0);
    std::net::TcpListener::bind((ip(HOST_IP), port)).expect("port should still be free");
}
