//! Persisted agent state.
//!
//! One JSON document per process. Everything the server tells us about our
//! identity lives here, next to the per-worker speed reference the estimator
//! falls back on. Callers hold the async lock across a read-modify-write so
//! one cycle's update is never interleaved with another's.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};

use crate::progress::sample::SpeedReference;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentState {
    pub guid: Option<String>,
    pub hardware_guid: Option<String>,
    /// Last program options counter (`od`) acted upon.
    pub options_counter: Option<u64>,
    pub user_id: Option<String>,
    pub computer_name: Option<String>,
    pub user_name: Option<String>,
    pub work_preference: Option<u32>,
    pub worker_threads: Option<u32>,
    pub days_of_work: Option<f64>,
    pub memory_mib: Option<u64>,
    /// Keyed by worker index.
    pub speed: BTreeMap<usize, SpeedReference>,
    /// Unix seconds of the last successful progress cycle.
    pub last_progress_push: Option<u64>,
    pub no_more_work: bool,
    /// Program string from the most recent submitted result.
    pub program: Option<String>,
}

impl AgentState {
    pub fn is_registered(&self) -> bool {
        self.guid.is_some()
    }
}

#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: Mutex<AgentState>,
}

impl StateStore {
    /// Reads `path`, starting from an empty state when it does not exist.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("failed to parse state file {}", path.display()))?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no state file yet; starting fresh");
                AgentState::default()
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read state file {}", path.display()))
            }
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// In-memory store, for tests and one-shot tools. Nothing is written
    /// until [`StateStore::save`] is called with a path-backed store.
    pub fn in_memory(path: impl Into<PathBuf>, state: AgentState) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn lock(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().await
    }

    pub async fn snapshot(&self) -> AgentState {
        self.state.lock().await.clone()
    }

    /// Applies `change` and persists the result while still holding the lock.
    pub async fn update<R>(&self, change: impl FnOnce(&mut AgentState) -> R) -> Result<R> {
        let mut guard = self.state.lock().await;
        let result = change(&mut guard);
        self.save(&guard).await?;
        Ok(result)
    }

    pub async fn save(&self, state: &AgentState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state).context("failed to serialize state")?;
        write_atomic(&self.path, &bytes).await
    }
}

/// Writes `bytes` next to `path` and renames over it.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?;
    let mut temp_name = file_name.to_os_string();
    temp_name.push(".tmp");
    let temp = path.with_file_name(temp_name);

    let mut file = tokio::fs::File::create(&temp)
        .await
        .with_context(|| format!("failed to create {}", temp.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("failed to write {}", temp.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("failed to sync {}", temp.display()))?;
    drop(file);

    tokio::fs::rename(&temp, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::load(dir.path().join("local.json"))
            .await
            .expect("load");
        assert_eq!(store.snapshot().await, AgentState::default());
        assert!(!store.snapshot().await.is_registered());
    }

    #[tokio::test]
    async fn update_persists_and_reloads() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("local.json");
        let store = StateStore::load(&path).await.expect("load");
        store
            .update(|state| {
                state.guid = Some("0123456789abcdef0123456789abcdef".into());
                state.speed.insert(
                    1,
                    SpeedReference {
                        exponent: 110_000_017,
                        ms_per_iter: 2.5,
                    },
                );
            })
            .await
            .expect("update");

        let reloaded = StateStore::load(&path).await.expect("reload");
        let state = reloaded.snapshot().await;
        assert_eq!(state.guid.as_deref(), Some("0123456789abcdef0123456789abcdef"));
        assert_eq!(state.speed[&1].ms_per_iter, 2.5);
        assert!(!dir.path().join("local.json.tmp").exists());
    }

    #[tokio::test]
    async fn unknown_keys_and_missing_fields_are_tolerated() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("local.json");
        tokio::fs::write(&path, br#"{"guid":"abc","extra":1}"#)
            .await
            .expect("seed");
        let store = StateStore::load(&path).await.expect("load");
        let state = store.snapshot().await;
        assert_eq!(state.guid.as_deref(), Some("abc"));
        assert!(!state.no_more_work);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("local.json");
        tokio::fs::write(&path, b"not json").await.expect("seed");
        let err = StateStore::load(&path).await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse state file"));
    }
}
