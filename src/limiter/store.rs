//! Shared bucket stores
//!
//! A store owns the grant history of every identity and performs the
//! check-and-record step as one atomic read-modify-write, so several
//! processes can enforce one budget. Processes sharing a store are expected
//! to share the rule set.
//!
//! [`FileStore`] keeps the history in a JSON file guarded by an exclusive
//! advisory lock.

use super::rules::RateRule;
use super::window::{Admission, GrantLog};
use crate::error::{Error, Result};
use async_trait::async_trait;
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Persistence backend for limiter state
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Atomically check capacity for `identity` and record a grant if admitted
    async fn try_admit(&self, identity: &str, rules: &[RateRule], now_ms: i64)
        -> Result<Admission>;

    /// Short backend name for log lines
    fn kind(&self) -> &'static str;
}

// ============================================================================
// File-backed store
// ============================================================================

/// Grant history persisted to a JSON file under an exclusive file lock
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Use `path` as the state file, creating parent directories if needed
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current state without taking a grant
    pub fn snapshot(&self) -> Result<HashMap<String, GrantLog>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let mut file = File::open(&self.path)?;
        FileExt::lock_shared(&file)?;
        let state = read_state(&mut file, &self.path);
        FileExt::unlock(&file)?;
        Ok(state)
    }
}

#[async_trait]
impl BucketStore for FileStore {
    async fn try_admit(
        &self,
        identity: &str,
        rules: &[RateRule],
        now_ms: i64,
    ) -> Result<Admission> {
        let path = self.path.clone();
        let identity = identity.to_string();
        let rules = rules.to_vec();

        tokio::task::spawn_blocking(move || admit_locked(&path, &identity, &rules, now_ms))
            .await
            .map_err(|e| Error::store(format!("Limiter store task failed: {e}")))?
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}

/// Lock, read, admit, write back, unlock
fn admit_locked(
    path: &Path,
    identity: &str,
    rules: &[RateRule],
    now_ms: i64,
) -> Result<Admission> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| Error::store(format!("Failed to open '{}': {e}", path.display())))?;

    FileExt::lock_exclusive(&file)
        .map_err(|e| Error::store(format!("Failed to lock '{}': {e}", path.display())))?;

    let outcome = update_state(&mut file, path, identity, rules, now_ms);
    FileExt::unlock(&file)?;
    outcome
}

fn update_state(
    file: &mut File,
    path: &Path,
    identity: &str,
    rules: &[RateRule],
    now_ms: i64,
) -> Result<Admission> {
    let mut state = read_state(file, path);
    let admission = state.entry(identity.to_string()).or_default().admit(rules, now_ms);

    if admission == Admission::Granted {
        // Drop history of every identity that has gone quiet
        let widest = rules.iter().map(RateRule::window_ms).max().unwrap_or(0);
        state.retain(|_, log| {
            log.expire(now_ms - widest);
            !log.is_empty()
        });

        let bytes = serde_json::to_vec(&state)?;
        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(&bytes)?;
        file.flush()?;
    }

    Ok(admission)
}

/// Read state, treating empty or unreadable content as no history
fn read_state(file: &mut File, path: &Path) -> HashMap<String, GrantLog> {
    let mut contents = String::new();
    if let Err(e) = file
        .seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_string(&mut contents))
    {
        warn!("Failed to read limiter state '{}': {e}", path.display());
        return HashMap::new();
    }

    if contents.trim().is_empty() {
        return HashMap::new();
    }

    serde_json::from_str(&contents).unwrap_or_else(|e| {
        warn!(
            "Discarding unreadable limiter state '{}': {e}",
            path.display()
        );
        HashMap::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("limiter.json");
        let rules = [RateRule::per_minute(2)];

        let first = FileStore::new(&path).unwrap();
        assert_eq!(first.try_admit("svc", &rules, 1_000).await.unwrap(), Admission::Granted);

        // A second handle sees the grant recorded by the first
        let second = FileStore::new(&path).unwrap();
        assert_eq!(second.try_admit("svc", &rules, 2_000).await.unwrap(), Admission::Granted);
        assert_eq!(
            first.try_admit("svc", &rules, 3_000).await.unwrap(),
            Admission::Wait(std::time::Duration::from_millis(58_000))
        );

        let snapshot = second.snapshot().unwrap();
        assert_eq!(snapshot["svc"].len(), 2);
    }

    #[tokio::test]
    async fn test_file_store_recovers_from_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("limiter.json");
        std::fs::write(&path, "not json at all").unwrap();

        let store = FileStore::new(&path).unwrap();
        let rules = [RateRule::per_second(1)];
        assert_eq!(store.try_admit("x", &rules, 0).await.unwrap(), Admission::Granted);

        let saved: HashMap<String, GrantLog> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["x"].len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_forgets_idle_identities() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("limiter.json");
        let store = FileStore::new(&path).unwrap();
        let rules = [RateRule::per_second(1)];

        store.try_admit("idle", &rules, 0).await.unwrap();
        store.try_admit("busy", &rules, 500).await.unwrap();
        assert_eq!(store.snapshot().unwrap().len(), 2);

        // "idle" never calls again, but its history expires on the next write
        store.try_admit("busy", &rules, 5_000).await.unwrap();
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["busy"].len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/state/limiter.json");
        let store = FileStore::new(&path).unwrap();
        assert!(store.snapshot().unwrap().is_empty());

        store
            .try_admit("x", &[RateRule::per_second(1)], 0)
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_file_store_concurrent_acquirers_never_exceed_limit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("limiter.json");
        let rules = [RateRule::per_minute(5)];

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = Arc::new(FileStore::new(&path).unwrap());
            let rules = rules.to_vec();
            handles.push(tokio::spawn(async move {
                store.try_admit("shared", &rules, 10_000).await.unwrap()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() == Admission::Granted {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
    }
}
