//! The per-worker work queue file.
//!
//! The compute engine edits this file too, so every operation starts from a
//! fresh read and every rewrite goes through a temp file and a rename.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::assignment::codec::parse_line;
use crate::assignment::model::Assignment;
use crate::runtime::state::write_atomic;

#[derive(Debug, Clone)]
pub struct WorkQueue {
    path: PathBuf,
    lines: Vec<String>,
}

impl WorkQueue {
    /// Reads the queue; a missing file is an empty queue.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lines = read_lines(&path).await?;
        Ok(Self { path, lines })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|line| line.trim().is_empty())
    }

    /// Every parseable entry in file order. Bad lines are logged and skipped.
    pub fn assignments(&self) -> Vec<Assignment> {
        self.lines
            .iter()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match parse_line(line) {
                Ok(assignment) => Some(assignment),
                Err(err) => {
                    tracing::error!(
                        path = %self.path.display(),
                        line = %line,
                        error = %err,
                        "discarding invalid queue entry"
                    );
                    None
                }
            })
            .collect()
    }

    /// Entries holding a server id, one per id. A repeated id keeps the
    /// position of its first occurrence and the content of its last.
    pub fn tracked(&self) -> Vec<Assignment> {
        let mut order: Vec<Assignment> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for assignment in self.assignments() {
            let Some(id) = assignment.id().map(str::to_owned) else {
                continue;
            };
            match positions.get(&id) {
                Some(&index) => order[index] = assignment,
                None => {
                    positions.insert(id, order.len());
                    order.push(assignment);
                }
            }
        }
        order
    }

    pub fn contains_exponent(&self, exponent: u64) -> bool {
        self.assignments()
            .iter()
            .any(|assignment| assignment.exponent() == exponent)
    }

    pub async fn append(path: &Path, lines: &[String]) -> Result<()> {
        append_lines(path, lines).await
    }

    /// Drops every line whose id is `id`. Returns whether anything changed.
    pub async fn remove_by_id(path: &Path, id: &str) -> Result<bool> {
        let queue = Self::load(path).await?;
        let before = queue.lines.len();
        let kept: Vec<&String> = queue
            .lines
            .iter()
            .filter(|line| {
                parse_line(line)
                    .map(|assignment| assignment.id() != Some(id))
                    .unwrap_or(true)
            })
            .collect();
        if kept.len() == before {
            return Ok(false);
        }

        let mut contents = String::new();
        for line in kept {
            contents.push_str(line);
            contents.push('\n');
        }
        write_atomic(path, contents.as_bytes()).await?;
        tracing::info!(path = %path.display(), id, "removed assignment from queue");
        Ok(true)
    }
}

/// Lines of a text file without trailing whitespace; missing file reads as empty.
pub(crate) async fn read_lines(path: &Path) -> Result<Vec<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(contents.lines().map(|l| l.trim_end().to_owned()).collect()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

pub(crate) async fn append_lines(path: &Path, lines: &[String]) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("failed to open {} for appending", path.display()))?;
    let mut contents = String::new();
    for line in lines {
        contents.push_str(line);
        contents.push('\n');
    }
    file.write_all(contents.as_bytes())
        .await
        .with_context(|| format!("failed to append to {}", path.display()))?;
    file.flush().await?;
    Ok(())
}
