//! lanshared: LAN chunk-sharing peer.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use lanshare_core::config::LanshareConfig;
use lanshared::Peer;

#[derive(Parser)]
#[command(name = "lanshared")]
#[command(about = "Share a file with peers on the local network, or fetch one")]
struct Cli {
    /// File to split into chunks and announce.
    #[arg(long, value_name = "FILE")]
    host: Option<PathBuf>,

    /// Content name to download. May be given several times.
    #[arg(long = "download", value_name = "NAME")]
    downloads: Vec<String>,

    /// Seconds to listen for announcements before the first download.
    #[arg(long, default_value_t = 5)]
    download_delay_secs: u64,

    /// Config file; overrides $LANSHARE_CONFIG.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stop once the downloads are done instead of serving until Ctrl-C.
    #[arg(long)]
    exit_after_downloads: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Load config
    let loaded = match &cli.config {
        Some(path) => LanshareConfig::load_from(path),
        None => {
            if let Err(e) = LanshareConfig::write_default_if_missing() {
                tracing::warn!(error = %e, "failed to write default config");
            }
            LanshareConfig::load()
        }
    };
    let config = loaded.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        LanshareConfig::default()
    });
    tracing::info!(work_dir = %config.storage.work_dir.display(), "lanshared starting");

    let mut peer = Peer::start(config, cli.host).await?;

    if !cli.downloads.is_empty() {
        tracing::info!(
            secs = cli.download_delay_secs,
            "waiting for announcements before downloading"
        );
        tokio::time::sleep(Duration::from_secs(cli.download_delay_secs)).await;

        let mut failed = 0usize;
        for name in &cli.downloads {
            match peer.download(name).await {
                Ok(path) => println!("{name}: saved to {}", path.display()),
                Err(e) => {
                    failed += 1;
                    tracing::error!(content = %name, error = %e, "download failed");
                    eprintln!("{name}: {e}");
                }
            }
        }

        if cli.exit_after_downloads {
            peer.shutdown().await?;
            if failed > 0 {
                anyhow::bail!("{failed} of {} downloads failed", cli.downloads.len());
            }
            return Ok(());
        }
    }

    let served = peer.serve_until_ctrl_c().await;
    peer.shutdown().await?;
    served
}
