//! Proof files on disk: header check, checksum, discovery and disposal.

use anyhow::{Context, Result};
use md5::{Digest, Md5};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

pub const PROOF_DIR: &str = "proof";
pub const PROOF_EXTENSION: &str = "proof";
const PROOF_MAGIC: &str = "PRP PROOF";
const HEADER_LINES: usize = 5;

/// Exponent named by a proof header, or `None` when the file is not a
/// PRP proof. Line 1 is the magic, line 5 reads `N=M<exponent>`.
pub fn parse_header(lines: &[String]) -> Option<u64> {
    if lines.first().map(String::as_str) != Some(PROOF_MAGIC) {
        return None;
    }
    let (_, number) = lines.get(HEADER_LINES - 1)?.split_once('=')?;
    let digits: String = number
        .trim_start_matches('M')
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

pub async fn read_header(path: &Path) -> Result<Option<u64>> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut lines = Vec::with_capacity(HEADER_LINES);
    let mut buffer = Vec::new();
    for _ in 0..HEADER_LINES {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer).await? == 0 {
            break;
        }
        lines.push(String::from_utf8_lossy(&buffer).trim_end().to_owned());
    }
    Ok(parse_header(&lines))
}

/// MD5 (lowercase hex) and size of a file, read in blocks.
pub async fn file_digest(path: &Path) -> Result<(String, u64)> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

/// `<dir>/proof/*.proof`, sorted by name. A missing directory yields nothing.
pub async fn proof_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let proof_dir = dir.join(PROOF_DIR);
    let mut entries = match tokio::fs::read_dir(&proof_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %proof_dir.display(), "proof directory does not exist");
            return Ok(Vec::new());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to list {}", proof_dir.display()))
        }
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == PROOF_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Moves an uploaded proof into `archive` (relative paths resolve against
/// the worker directory), or deletes it when no archive is configured.
pub async fn dispose(path: &Path, worker_dir: &Path, archive: Option<&Path>) -> Result<()> {
    let Some(archive) = archive else {
        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("failed to remove {}", path.display()))?;
        return Ok(());
    };

    let archive = worker_dir.join(archive);
    tokio::fs::create_dir_all(&archive)
        .await
        .with_context(|| format!("failed to create {}", archive.display()))?;
    let Some(name) = path.file_name() else {
        anyhow::bail!("proof path {} has no file name", path.display());
    };
    let target = archive.join(name);
    tokio::fs::rename(path, &target)
        .await
        .with_context(|| format!("failed to move {} to {}", path.display(), target.display()))?;
    tracing::debug!(from = %path.display(), to = %target.display(), "archived proof");
    Ok(())
}
