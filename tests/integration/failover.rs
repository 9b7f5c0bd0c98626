use std::time::Duration;

use lanshare_core::wire::ChunkId;
use lanshare_services::{part_path, Direction};
use lanshared::{DownloadError, Peer};

use crate::*;

/// Start a host on `port` serving `name` and wait until it is reachable.
async fn start_host(root: &std::path::Path, port: u16, name: &str, len: usize) -> (Peer, Vec<u8>) {
    let (source, data) = write_test_file(&root.join("share"), name, len);
    let host = Peer::start(peer_config(&root.join("a"), HOST_IP, port), Some(source))
        .await
        .unwrap();
    (host, data)
}

/// Both candidates are known; the first refuses connections, so every chunk
/// comes from the second and only the second appears in the log.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refused_peer_falls_over_to_next() {
    let tmp = tempfile::tempdir().unwrap();
    let port = free_port();
    let (host, data) = start_host(tmp.path(), port, "album.zip", 77_777).await;

    let fetcher = Peer::start(peer_config(&tmp.path().join("b"), FETCHER_IP, port), None)
        .await
        .unwrap();
    for chunk in ChunkId::all("album.zip").unwrap() {
        fetcher.index().insert(chunk.clone(), ip(DEAD_IP));
        fetcher.index().insert(chunk, ip(HOST_IP));
    }

    let output = fetcher.download("album.zip").await.unwrap();
    assert_eq!(std::fs::read(output).unwrap(), data);

    let entries = fetcher
        .log()
        .entries("album.zip", Direction::Download)
        .unwrap();
    assert_eq!(entries.len(), 5);
    assert!(entries.iter().all(|e| e.peer == HOST_IP));
    for chunk in ChunkId::all("album.zip").unwrap() {
        assert_eq!(fetcher.stats().downloaded_from(&chunk), Some(ip(HOST_IP)));
    }

    fetcher.shutdown().await.unwrap();
    host.shutdown().await.unwrap();
}

/// One chunk's only candidate is unreachable. The others still arrive, the
/// download fails naming exactly that chunk, and no output file appears.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_only_peer_leaves_download_incomplete() {
    let tmp = tempfile::tempdir().unwrap();
    let port = free_port();
    let (host, _) = start_host(tmp.path(), port, "set.tar", 5_000).await;

    let fetcher = Peer::start(peer_config(&tmp.path().join("b"), FETCHER_IP, port), None)
        .await
        .unwrap();
    let lost: ChunkId = "set.tar_2".parse().unwrap();
    for chunk in ChunkId::all("set.tar").unwrap() {
        let peer = if chunk == lost { DEAD_IP } else { HOST_IP };
        fetcher.index().insert(chunk, ip(peer));
    }

    let err = fetcher.download("set.tar").await.unwrap_err();
    match err {
        DownloadError::Incomplete { content, missing } => {
            assert_eq!(content, "set.tar");
            assert_eq!(missing, vec![lost.clone()]);
        }
        other => panic!("expected Incomplete, got {other}"),
    }

    let downloads = tmp.path().join("b").join("downloads");
    assert!(!downloads.join("set.tar").exists());
    for chunk in ChunkId::all("set.tar").unwrap() {
        assert_eq!(part_path(&downloads, &chunk).exists(), chunk != lost, "{chunk}");
    }
    assert_eq!(
        fetcher
            .log()
            .entries("set.tar", Direction::Download)
            .unwrap()
            .len(),
        4
    );

    fetcher.shutdown().await.unwrap();
    host.shutdown().await.unwrap();
}

/// A content nobody announced fails fast with every chunk missing.
#[tokio::test]
async fn test_unknown_content_reports_every_chunk() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = Peer::start(peer_config(tmp.path(), FETCHER_IP, free_port()), None)
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    match fetcher.download("ghost.iso").await {
        Err(DownloadError::Incomplete { missing, .. }) => assert_eq!(missing.len(), 5),
        other => panic!("expected Incomplete, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(2));

    fetcher.shutdown().await.unwrap();
}
