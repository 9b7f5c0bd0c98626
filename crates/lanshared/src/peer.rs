//! Peer: wires the store, index, logs and network loops together.
//!
//! A peer always listens for announcements and serves uploads. When given a
//! file to host it also partitions it and announces the resulting chunks.
//! Downloads run on the caller's task, one content at a time.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use lanshare_core::config::LanshareConfig;
use lanshare_services::{partition, ChunkStore, ContentIndex, TransferLog};

use crate::capability::broadcast::broadcast_loop;
use crate::capability::listener::{bind_discovery_socket, DiscoveryListener};
use crate::download::{DownloadError, Downloader};
use crate::stats::TransferStats;
use crate::upload::{ChunkServer, UploadServer};

const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Address used only to pick the outbound interface; nothing is sent.
const ROUTE_TARGET: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 80);

type Task = (&'static str, Result<()>);

pub struct Peer {
    config: LanshareConfig,
    index: ContentIndex,
    log: TransferLog,
    stats: TransferStats,
    store: ChunkStore,
    hosted: Option<String>,
    upload_addr: SocketAddr,
    discovery_addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    tasks: JoinSet<Task>,
}

impl Peer {
    /// Open local state, bind sockets and start the background loops.
    ///
    /// With `host`, the file is partitioned into `<its dir>/chunks` and those
    /// chunks are served and announced. Otherwise the peer serves
    /// `<work_dir>/chunks` and announces nothing.
    pub async fn start(config: LanshareConfig, host: Option<PathBuf>) -> Result<Peer> {
        let index = ContentIndex::open(config.storage.index_path());
        let log = TransferLog::new(config.storage.logs_dir()).context("failed to open transfer logs")?;
        let stats = TransferStats::new();

        let (store, hosted) = match host {
            Some(source) => {
                let (store, content) = host_file(source).await?;
                (store, Some(content))
            }
            None => {
                let store = ChunkStore::new(config.storage.chunks_dir())
                    .context("failed to open chunk store")?;
                (store, None)
            }
        };

        let discovery_socket = bind_discovery_socket(SocketAddr::from((
            Ipv4Addr::UNSPECIFIED,
            config.network.discovery_port,
        )))?;
        let discovery_addr = discovery_socket.local_addr()?;

        let upload_ip = match config.network.bind_ip()? {
            Some(ip) => ip,
            None => local_ip(),
        };
        let upload_listener = TcpListener::bind(SocketAddr::new(upload_ip, config.network.upload_port))
            .await
            .with_context(|| format!("failed to bind upload server on {upload_ip}"))?;
        let upload_addr = upload_listener.local_addr()?;

        let (shutdown, _) = broadcast::channel::<()>(1);
        let mut tasks = JoinSet::new();

        let listener = DiscoveryListener::new(discovery_socket, index.clone(), shutdown.subscribe());
        tasks.spawn(async move { ("discovery listener", listener.run().await) });

        let handler = ChunkServer::new(
            store.clone(),
            log.clone(),
            stats.clone(),
            config.transfer.request_timeout(),
        );
        let server = UploadServer::new(
            upload_listener,
            handler,
            config.transfer.max_upload_connections,
            shutdown.subscribe(),
        );
        tasks.spawn(async move { ("upload server", server.run().await) });

        if let Some(content) = &hosted {
            let dest = SocketAddr::new(config.network.broadcast_ip()?, discovery_addr.port());
            let announcer = broadcast_loop(
                store.clone(),
                content.clone(),
                dest,
                config.network.announce_interval(),
                shutdown.subscribe(),
            );
            tasks.spawn(async move { ("chunk announcer", announcer.await) });
        }

        {
            let stats = stats.clone();
            let mut shutdown = shutdown.subscribe();
            tasks.spawn(async move {
                let mut interval = tokio::time::interval(STATS_INTERVAL);
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => return ("stats printer", Ok(())),
                        _ = interval.tick() => stats.print_stats(),
                    }
                }
            });
        }

        tracing::info!(
            upload = %upload_addr,
            discovery = %discovery_addr,
            hosted = hosted.as_deref().unwrap_or("-"),
            "peer started"
        );

        Ok(Peer {
            config,
            index,
            log,
            stats,
            store,
            hosted,
            upload_addr,
            discovery_addr,
            shutdown,
            tasks,
        })
    }

    /// Download one content from the peers currently in the index.
    pub async fn download(&self, content: &str) -> Result<PathBuf, DownloadError> {
        Downloader::new(
            self.index.clone(),
            self.log.clone(),
            self.stats.clone(),
            self.config.storage.downloads_dir(),
            self.config.network.upload_port,
        )
        .with_timeouts(
            self.config.transfer.connect_timeout(),
            self.config.transfer.request_timeout(),
        )
        .download(content)
        .await
    }

    pub fn index(&self) -> &ContentIndex {
        &self.index
    }

    pub fn log(&self) -> &TransferLog {
        &self.log
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Content name of the hosted file, if any.
    pub fn hosted(&self) -> Option<&str> {
        self.hosted.as_deref()
    }

    pub fn upload_addr(&self) -> SocketAddr {
        self.upload_addr
    }

    pub fn discovery_addr(&self) -> SocketAddr {
        self.discovery_addr
    }

    /// Keep serving until Ctrl-C, or until a background loop dies.
    pub async fn serve_until_ctrl_c(&mut self) -> Result<()> {
        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                r.context("failed to listen for ctrl-c")?;
                tracing::info!("shutdown signal received");
                Ok(())
            }
            Some(joined) = self.tasks.join_next() => {
                let (name, result) = joined.context("background task panicked")?;
                result.with_context(|| format!("{name} failed"))?;
                anyhow::bail!("{name} exited unexpectedly")
            }
        }
    }

    /// Signal every loop to stop and wait for them.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown.send(());

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => tracing::debug!(task = name, "task stopped"),
                Ok((name, Err(e))) => tracing::error!(task = name, error = %e, "task failed"),
                Err(e) => tracing::error!(error = %e, "task panicked"),
            }
        }

        self.index
            .save()
            .await
            .context("failed to persist content index")?;
        tracing::info!("peer stopped");
        Ok(())
    }
}

/// Partition `source` into `<its dir>/chunks`. Returns the store and the
/// content name.
async fn host_file(source: PathBuf) -> Result<(ChunkStore, String)> {
    let dir = source
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let store = ChunkStore::new(dir.join("chunks")).context("failed to open chunk store")?;

    let chunks = tokio::task::spawn_blocking({
        let store = store.clone();
        let source = source.clone();
        move || partition(&source, &store)
    })
    .await
    .context("partition task panicked")?
    .with_context(|| format!("failed to partition {}", source.display()))?;

    let content = chunks
        .first()
        .map(|c| c.content().to_string())
        .context("partition produced no chunks")?;
    tracing::info!(
        content = %content,
        chunks = chunks.len(),
        dir = %store.root().display(),
        "file partitioned"
    );
    Ok((store, content))
}

/// The address this host would use to reach the wider network.
/// Falls back to the unspecified address when there is no usable route.
pub fn local_ip() -> IpAddr {
    let discover = || -> std::io::Result<IpAddr> {
        let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(ROUTE_TARGET)?;
        Ok(socket.local_addr()?.ip())
    };
    match discover() {
        Ok(ip) if !ip.is_loopback() && !ip.is_unspecified() => ip,
        Ok(ip) => {
            tracing::warn!(ip = %ip, "no non-loopback address found, binding all interfaces");
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        }
        Err(e) => {
            tracing::warn!(error = %e, "local address lookup failed, binding all interfaces");
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        }
    }
}
