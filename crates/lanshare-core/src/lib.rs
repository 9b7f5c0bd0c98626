//! lanshare-core: shared types, wire format, and configuration.
//! All other lanshare crates depend on this one.

pub mod config;
pub mod wire;

pub use config::LanshareConfig;
pub use wire::{Announcement, ChunkId, ChunkRequest, ResponseHeader, ResponseStatus, CHUNK_COUNT};
