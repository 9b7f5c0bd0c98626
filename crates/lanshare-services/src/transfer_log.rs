//! Transfer logs: one append-only text file per content and direction.
//!
//!   <logs>/<content>-upload.log     "2026-01-02 03:04:05, a.txt_0, 10.0.0.2:51234"
//!   <logs>/<content>-download.log   column-padded, with a header line

use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lanshare_core::wire::ChunkId;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIMESTAMP_WIDTH: usize = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    fn suffix(self) -> &'static str {
        match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
        }
    }
}

/// One parsed log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLogEntry {
    pub timestamp: String,
    pub chunk: ChunkId,
    pub peer: String,
}

/// Writer for the per-content transfer logs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TransferLog {
    dir: PathBuf,
    /// Serializes appends from concurrent upload handlers.
    append_lock: Arc<Mutex<()>>,
}

impl TransferLog {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, TransferLogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| TransferLogError::Io(dir.clone(), e))?;
        Ok(Self {
            dir,
            append_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, content: &str, direction: Direction) -> PathBuf {
        self.dir
            .join(format!("{}-{}.log", content, direction.suffix()))
    }

    /// Append one entry for a completed transfer of `chunk` to or from `peer`.
    pub fn record(
        &self,
        direction: Direction,
        chunk: &ChunkId,
        peer: impl Display,
    ) -> Result<(), TransferLogError> {
        let path = self.path(chunk.content(), direction);
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();

        let _guard = self
            .append_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TransferLogError::Io(path.clone(), e))?;

        let mut text = String::new();
        match direction {
            Direction::Upload => {
                text.push_str(&format!("{timestamp}, {chunk}, {peer}\n"));
            }
            Direction::Download => {
                let is_new = file
                    .metadata()
                    .map_err(|e| TransferLogError::Io(path.clone(), e))?
                    .len()
                    == 0;
                if is_new {
                    text.push_str(&format!(
                        "{:<20} {:<15} {:<20}\n",
                        "Timestamp", "Chunk", "Downloaded From"
                    ));
                }
                text.push_str(&format!(
                    "{:<20} {:<15} {:<20}\n",
                    timestamp,
                    chunk.to_string(),
                    peer.to_string()
                ));
            }
        }

        file.write_all(text.as_bytes())
            .map_err(|e| TransferLogError::Io(path.clone(), e))?;
        Ok(())
    }

    /// Read back the entries for a content. A log that does not exist yet
    /// has no entries.
    pub fn entries(
        &self,
        content: &str,
        direction: Direction,
    ) -> Result<Vec<TransferLogEntry>, TransferLogError> {
        let path = self.path(content, direction);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TransferLogError::Io(path, e)),
        };

        let lines = text.lines().filter(|l| !l.trim().is_empty());
        let lines: Vec<&str> = match direction {
            Direction::Upload => lines.collect(),
            Direction::Download => lines.skip(1).collect(),
        };

        lines
            .into_iter()
            .map(|line| {
                parse_line(line, direction)
                    .ok_or_else(|| TransferLogError::Malformed(path.clone(), line.to_string()))
            })
            .collect()
    }
}

/// The timestamp has a fixed width and peer addresses contain no spaces,
/// so the chunk name is whatever sits between them.
fn parse_line(line: &str, direction: Direction) -> Option<TransferLogEntry> {
    let timestamp = line.get(..TIMESTAMP_WIDTH)?;
    let rest = line.get(TIMESTAMP_WIDTH..)?;

    let (chunk, peer) = match direction {
        Direction::Upload => rest.strip_prefix(", ")?.rsplit_once(", ")?,
        Direction::Download => rest.trim().rsplit_once(' ')?,
    };

    Some(TransferLogEntry {
        timestamp: timestamp.to_string(),
        chunk: chunk.trim().parse().ok()?,
        peer: peer.trim().to_string(),
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TransferLogError {
    #[error("transfer log {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("malformed line in {0}: {1:?}")]
    Malformed(PathBuf, String),
}
