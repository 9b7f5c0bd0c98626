//! lanshare wire format: everything that crosses the network.
//!
//! Two transports carry protocol data:
//!   - UDP broadcast on the discovery port: one JSON `Announcement` per datagram.
//!   - TCP on the upload port: one JSON `ChunkRequest` from the client, answered
//!     by a fixed-size `ResponseHeader` and, on success, exactly `length` bytes.
//!
//! Chunk names are the only identifiers on the wire. Their string form is
//! `<content>_<index>` and doubles as the on-disk file name of the chunk.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Every hosted file is split into exactly this many chunks.
/// All peers on a network must agree on it; there is no negotiation.
pub const CHUNK_COUNT: u32 = 5;

/// UDP port on which announcements are broadcast and received.
pub const DISCOVERY_PORT: u16 = 5001;

/// TCP port on which peers serve chunk requests.
pub const UPLOAD_PORT: u16 = 5000;

/// Limited broadcast address. Reaches every host on the local segment.
pub const BROADCAST_ADDR: &str = "255.255.255.255";

/// Seconds between two announcements from the same host.
pub const ANNOUNCE_INTERVAL_SECS: u64 = 2;

/// Largest payload a single IPv4 UDP datagram can carry.
pub const MAX_DATAGRAM: usize = 65_507;

/// Upper bound on the size of a serialized `ChunkRequest`.
pub const MAX_REQUEST_BYTES: usize = 4096;

// ── Chunk identifiers ─────────────────────────────────────────────────────────

/// Names one chunk of one hosted file.
///
/// Ordering is by content name first, then index, so sorting a set of
/// identifiers yields reassembly order for each content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkId {
    content: String,
    index: u32,
}

impl ChunkId {
    pub fn new(content: impl Into<String>, index: u32) -> Result<Self, ChunkIdError> {
        let content = content.into();
        validate_content_name(&content)?;
        if index >= CHUNK_COUNT {
            return Err(ChunkIdError::IndexOutOfRange(index));
        }
        Ok(Self { content, index })
    }

    /// All chunk identifiers of a content, in index order.
    pub fn all(content: &str) -> Result<Vec<ChunkId>, ChunkIdError> {
        (0..CHUNK_COUNT).map(|i| ChunkId::new(content, i)).collect()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Content names become file names, so anything that could escape the
/// chunk directory is rejected.
pub fn validate_content_name(name: &str) -> Result<(), ChunkIdError> {
    if name.is_empty() {
        return Err(ChunkIdError::EmptyContent);
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(ChunkIdError::InvalidContent(name.to_string()));
    }
    Ok(())
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.content, self.index)
    }
}

impl FromStr for ChunkId {
    type Err = ChunkIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Content names may contain underscores; the index follows the last one.
        let (content, index) = s
            .rsplit_once('_')
            .ok_or_else(|| ChunkIdError::MissingSeparator(s.to_string()))?;
        let index = index
            .parse::<u32>()
            .map_err(|_| ChunkIdError::InvalidIndex(s.to_string()))?;
        ChunkId::new(content, index)
    }
}

impl TryFrom<String> for ChunkId {
    type Error = ChunkIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChunkId> for String {
    fn from(id: ChunkId) -> String {
        id.to_string()
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// Broadcast by a host every announce interval.
///
/// Lists the chunks the host currently has on disk. The sender is identified
/// by the datagram's source address, never by the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub chunks: Vec<ChunkId>,
}

impl Announcement {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let bytes = serde_json::to_vec(self).map_err(WireError::Encode)?;
        if bytes.len() > MAX_DATAGRAM {
            return Err(WireError::DatagramTooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Malformed)
    }
}

/// Sent by a downloader as the only message on a fresh TCP connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequest {
    pub requested_content: ChunkId,
}

impl ChunkRequest {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() > MAX_REQUEST_BYTES {
            return Err(WireError::RequestTooLarge(bytes.len()));
        }
        serde_json::from_slice(bytes).map_err(WireError::Malformed)
    }
}

// ── Response header ───────────────────────────────────────────────────────────

/// Outcome byte of a chunk response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseStatus {
    /// The chunk follows: exactly `length` bytes.
    Found = 0x01,
    /// The server does not hold the chunk. No body follows.
    NotFound = 0x02,
}

impl TryFrom<u8> for ResponseStatus {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(ResponseStatus::Found),
            0x02 => Ok(ResponseStatus::NotFound),
            other => Err(WireError::UnknownStatus(other)),
        }
    }
}

impl From<ResponseStatus> for u8 {
    fn from(s: ResponseStatus) -> u8 {
        s as u8
    }
}

/// Precedes every chunk response.
///
/// An empty chunk (`Found`, length 0) and a missing chunk (`NotFound`) are
/// distinct on the wire, and a truncated body is detectable.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ResponseHeader {
    /// `ResponseStatus` as a byte.
    pub status: u8,

    /// Must be zero.
    pub reserved: [u8; 3],

    /// Body length in bytes, big-endian.
    pub length: [u8; 8],
}

assert_eq_size!(ResponseHeader, [u8; 12]);

impl ResponseHeader {
    pub const SIZE: usize = std::mem::size_of::<ResponseHeader>();

    pub fn found(length: u64) -> Self {
        Self {
            status: ResponseStatus::Found.into(),
            reserved: [0; 3],
            length: length.to_be_bytes(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: ResponseStatus::NotFound.into(),
            reserved: [0; 3],
            length: [0; 8],
        }
    }

    pub fn status(&self) -> Result<ResponseStatus, WireError> {
        ResponseStatus::try_from(self.status)
    }

    pub fn body_len(&self) -> u64 {
        u64::from_be_bytes(self.length)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors from parsing a chunk name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkIdError {
    #[error("chunk name {0:?} has no '_' separator")]
    MissingSeparator(String),

    #[error("chunk name {0:?} has a non-numeric index")]
    InvalidIndex(String),

    #[error("chunk index {0} is outside 0..{}", CHUNK_COUNT)]
    IndexOutOfRange(u32),

    #[error("content name is empty")]
    EmptyContent,

    #[error("content name {0:?} is not a plain file name")]
    InvalidContent(String),
}

/// Errors that can arise when encoding or interpreting wire data.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed message: {0}")]
    Malformed(serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(serde_json::Error),

    #[error("announcement of {0} bytes does not fit in one datagram")]
    DatagramTooLarge(usize),

    #[error("request of {0} bytes exceeds the {} byte limit", MAX_REQUEST_BYTES)]
    RequestTooLarge(usize),

    #[error("unknown response status byte: 0x{0:02x}")]
    UnknownStatus(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_display_and_parse() {
        let id = ChunkId::new("movie.mkv", 3).unwrap();
        assert_eq!(id.to_string(), "movie.mkv_3");

        let parsed: ChunkId = "movie.mkv_3".parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.content(), "movie.mkv");
        assert_eq!(parsed.index(), 3);
    }

    #[test]
    fn chunk_id_splits_on_last_underscore() {
        let parsed: ChunkId = "my_big_file.tar_4".parse().unwrap();
        assert_eq!(parsed.content(), "my_big_file.tar");
        assert_eq!(parsed.index(), 4);
    }

    #[test]
    fn chunk_id_rejects_bad_names() {
        assert_eq!(
            "nounderscore".parse::<ChunkId>(),
            Err(ChunkIdError::MissingSeparator("nounderscore".into()))
        );
        assert!(matches!(
            "file_x".parse::<ChunkId>(),
            Err(ChunkIdError::InvalidIndex(_))
        ));
        assert_eq!(
            "file_5".parse::<ChunkId>(),
            Err(ChunkIdError::IndexOutOfRange(5))
        );
        assert_eq!("_0".parse::<ChunkId>(), Err(ChunkIdError::EmptyContent));
        assert!(matches!(
            "../etc/passwd_0".parse::<ChunkId>(),
            Err(ChunkIdError::InvalidContent(_))
        ));
        assert!(matches!(
            ".._1".parse::<ChunkId>(),
            Err(ChunkIdError::InvalidContent(_))
        ));
    }

    #[test]
    fn all_is_contiguous_and_complete() {
        let ids = ChunkId::all("a.bin").unwrap();
        assert_eq!(ids.len(), CHUNK_COUNT as usize);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(id.index(), i as u32);
            assert_eq!(id.content(), "a.bin");
        }
    }

    #[test]
    fn announcement_json_shape() {
        let ann = Announcement {
            chunks: ChunkId::all("f").unwrap()[..2].to_vec(),
        };
        let bytes = ann.encode().unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"chunks":["f_0","f_1"]}"#
        );
        assert_eq!(Announcement::decode(&bytes).unwrap(), ann);
    }

    #[test]
    fn announcement_rejects_missing_key_and_garbage() {
        assert!(Announcement::decode(br#"{"files":["f_0"]}"#).is_err());
        assert!(Announcement::decode(b"\xff\xfe not json").is_err());
        assert!(Announcement::decode(br#"{"chunks":["no-index"]}"#).is_err());
    }

    #[test]
    fn request_json_shape() {
        let req = ChunkRequest {
            requested_content: "song.mp3_0".parse().unwrap(),
        };
        let bytes = req.encode().unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"requested_content":"song.mp3_0"}"#
        );
    }

    #[test]
    fn request_rejects_oversized_input() {
        let big = vec![b' '; MAX_REQUEST_BYTES + 1];
        assert!(matches!(
            ChunkRequest::decode(&big),
            Err(WireError::RequestTooLarge(_))
        ));
    }

    #[test]
    fn response_header_layout() {
        let header = ResponseHeader::found(0x0102_0304_0506_0708);
        let bytes = header.as_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes[0], 0x01);
        assert_eq!(&bytes[1..4], &[0, 0, 0]);
        assert_eq!(&bytes[4..], &[1, 2, 3, 4, 5, 6, 7, 8]);

        let recovered = ResponseHeader::read_from(bytes).unwrap();
        assert_eq!(recovered.status().unwrap(), ResponseStatus::Found);
        assert_eq!(recovered.body_len(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn empty_chunk_and_missing_chunk_differ() {
        let empty = ResponseHeader::found(0);
        let missing = ResponseHeader::not_found();
        assert_ne!(empty.as_bytes(), missing.as_bytes());
        assert_eq!(missing.status().unwrap(), ResponseStatus::NotFound);
    }

    #[test]
    fn unknown_status_error_message() {
        let err = ResponseStatus::try_from(0xAB).unwrap_err();
        assert!(err.to_string().contains("0xab"));
    }
}
