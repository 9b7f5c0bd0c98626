//! lanshared: a LAN peer that hosts a file as chunks, announces them, and
//! fetches other peers' chunks on request.

pub mod capability;
pub mod download;
pub mod peer;
pub mod stats;
pub mod upload;

pub use download::{DownloadError, Downloader, PeerError};
pub use peer::Peer;
pub use stats::TransferStats;
pub use upload::{ChunkServer, Served, UploadError, UploadServer};
