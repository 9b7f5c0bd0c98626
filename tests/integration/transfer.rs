use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use zerocopy::FromBytes;

use lanshare_core::wire::{ChunkId, ResponseHeader, ResponseStatus};
use lanshare_services::{ContentIndex, Direction};
use lanshared::capability::broadcast::broadcast_loop;
use lanshared::Peer;

use crate::*;

const TEN_MB: usize = 10_000_000;

/// A hosts a 10 MB file, B learns about it from A's announcements and
/// downloads a byte-identical copy.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ten_megabyte_file_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let port = free_port();
    let (source, data) = write_test_file(&tmp.path().join("share"), "movie.bin", TEN_MB);

    let host = Peer::start(peer_config(&tmp.path().join("a"), HOST_IP, port), Some(source))
        .await
        .unwrap();
    assert_eq!(host.hosted(), Some("movie.bin"));

    // Exactly five chunks of exactly 2 MB.
    let chunks = ChunkId::all("movie.bin").unwrap();
    for chunk in &chunks {
        let len = std::fs::metadata(host.store().path(chunk)).unwrap().len();
        assert_eq!(len, 2_000_000, "{chunk}");
    }

    // The host hears its own announcements.
    wait_until(Duration::from_secs(10), "self discovery", || host.index().len() == 5)
        .await
        .unwrap();
    assert_eq!(host.index().peers(&chunks[0]), vec![ip(HOST_IP)]);

    let fetcher = Peer::start(peer_config(&tmp.path().join("b"), FETCHER_IP, port), None)
        .await
        .unwrap();

    // Aim a copy of the host's announcements at the fetcher's discovery port.
    let (stop_tx, stop_rx) = tokio::sync::broadcast::channel(1);
    let announcer = tokio::spawn(broadcast_loop(
        host.store().clone(),
        "movie.bin".into(),
        loopback(HOST_IP, fetcher.discovery_addr().port()),
        Duration::from_millis(200),
        stop_rx,
    ));

    wait_until(Duration::from_secs(10), "fetcher discovery", || {
        fetcher.index().len() == 5
    })
    .await
    .unwrap();

    let output = fetcher.download("movie.bin").await.unwrap();
    assert_eq!(output, tmp.path().join("b").join("downloads").join("movie.bin"));
    let received = std::fs::read(&output).unwrap();
    assert_eq!(received.len(), data.len());
    assert!(received == data, "downloaded file differs from the original");

    let downloads = fetcher
        .log()
        .entries("movie.bin", Direction::Download)
        .unwrap();
    assert_eq!(downloads.len(), 5);
    assert!(downloads.iter().all(|e| e.peer == HOST_IP));
    let logged: Vec<ChunkId> = downloads.iter().map(|e| e.chunk.clone()).collect();
    assert_eq!(logged, chunks);

    // Upload entries are written after the body goes out.
    wait_until(Duration::from_secs(5), "upload log", || {
        host.log()
            .entries("movie.bin", Direction::Upload)
            .map(|e| e.len() == 5)
            .unwrap_or(false)
    })
    .await
    .unwrap();
    let uploads = host.log().entries("movie.bin", Direction::Upload).unwrap();
    let mut served: Vec<ChunkId> = uploads.iter().map(|e| e.chunk.clone()).collect();
    served.sort();
    assert_eq!(served, chunks);

    assert_eq!(fetcher.stats().bytes_downloaded(), TEN_MB as u64);

    stop_tx.send(()).unwrap();
    announcer.await.unwrap().unwrap();

    let index_path = tmp.path().join("b").join("content_index.json");
    fetcher.shutdown().await.unwrap();
    host.shutdown().await.unwrap();

    // The fetcher's index survives a restart.
    let reloaded = ContentIndex::load(&index_path).unwrap();
    assert_eq!(reloaded.len(), 5);
    assert_eq!(reloaded.peers(&chunks[4]), vec![ip(HOST_IP)]);
}

/// Raw protocol check against a live host: a present chunk comes back with
/// its exact bytes and one log line; an absent one gets NotFound and no line.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_present_and_absent_chunks() {
    let tmp = tempfile::tempdir().unwrap();
    let port = free_port();
    let (source, _) = write_test_file(&tmp.path().join("share"), "doc.txt", 1_001);

    let host = Peer::start(peer_config(&tmp.path().join("a"), HOST_IP, port), Some(source))
        .await
        .unwrap();

    let present: ChunkId = "doc.txt_1".parse().unwrap();
    let on_disk = std::fs::read(host.store().path(&present)).unwrap();
    let (status, body) = request(host.upload_addr(), "doc.txt_1").await;
    assert_eq!(status, ResponseStatus::Found);
    assert_eq!(body, on_disk);

    let (status, body) = request(host.upload_addr(), "other.txt_0").await;
    assert_eq!(status, ResponseStatus::NotFound);
    assert!(body.is_empty());

    wait_until(Duration::from_secs(5), "upload log", || {
        host.log()
            .entries("doc.txt", Direction::Upload)
            .map(|e| e.len() == 1)
            .unwrap_or(false)
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(host.log().entries("doc.txt", Direction::Upload).unwrap().len(), 1);
    assert!(host
        .log()
        .entries("other.txt", Direction::Upload)
        .unwrap()
        .is_empty());
    assert!(!host.log().path("other.txt", Direction::Upload).exists());

    host.shutdown().await.unwrap();
}

async fn request(addr: SocketAddr, chunk: &str) -> (ResponseStatus, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = format!(r#"{{"requested_content":"{chunk}"}}"#);
    stream.write_all(req.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    let header = ResponseHeader::read_from(&reply[..ResponseHeader::SIZE]).unwrap();
    let body = reply[ResponseHeader::SIZE..].to_vec();
    assert_eq!(header.body_len(), body.len() as u64);
    (header.status().unwrap(), body)
}
