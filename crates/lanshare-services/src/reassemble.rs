//! Reassembly: concatenate chunk files in index order into the original file.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use lanshare_core::wire::ChunkId;

/// Where a downloaded chunk is kept before reassembly.
pub fn part_path(dir: &Path, chunk: &ChunkId) -> PathBuf {
    dir.join(format!("{chunk}.chunk"))
}

/// Concatenate `parts` (already in index order) into `output`.
///
/// Every part must exist. A missing part is an error and no output file is
/// produced; a truncated result is never written. Output is written to a
/// temp file and renamed into place. Returns the number of bytes written.
pub fn reassemble(parts: &[(ChunkId, PathBuf)], output: &Path) -> Result<u64, ReassembleError> {
    let missing: Vec<ChunkId> = parts
        .iter()
        .filter(|(_, path)| !path.is_file())
        .map(|(id, _)| id.clone())
        .collect();
    if !missing.is_empty() {
        return Err(ReassembleError::MissingChunks(missing));
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|e| ReassembleError::Write(parent.to_path_buf(), e))?;
    }

    let mut tmp_name = output.as_os_str().to_owned();
    tmp_name.push(".part");
    let tmp_path = PathBuf::from(tmp_name);

    let result = write_parts(parts, &tmp_path);
    let total = match result {
        Ok(total) => total,
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
    };

    fs::rename(&tmp_path, output).map_err(|e| ReassembleError::Write(output.to_path_buf(), e))?;

    tracing::info!(
        path = %output.display(),
        bytes = total,
        chunks = parts.len(),
        "file reassembled"
    );
    Ok(total)
}

fn write_parts(parts: &[(ChunkId, PathBuf)], tmp_path: &Path) -> Result<u64, ReassembleError> {
    let file = File::create(tmp_path).map_err(|e| ReassembleError::Write(tmp_path.to_path_buf(), e))?;
    let mut out = BufWriter::new(file);

    let mut total = 0u64;
    for (id, path) in parts {
        let mut part = File::open(path).map_err(|e| ReassembleError::Read(id.clone(), e))?;
        total += io::copy(&mut part, &mut out).map_err(|e| ReassembleError::Read(id.clone(), e))?;
    }

    out.flush()
        .map_err(|e| ReassembleError::Write(tmp_path.to_path_buf(), e))?;
    out.get_ref()
        .sync_all()
        .map_err(|e| ReassembleError::Write(tmp_path.to_path_buf(), e))?;
    Ok(total)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ReassembleError {
    #[error("cannot reassemble, missing chunks: {}", join(.0))]
    MissingChunks(Vec<ChunkId>),
    #[error("failed to read chunk {0}: {1}")]
    Read(ChunkId, std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
}

fn join(ids: &[ChunkId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
