use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::model::Snapshot;

/// Read-only diagnostics, as served by `/health` and friends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheInfo {
    pub cached: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub age_minutes: Option<f64>,
    pub update_in_progress: bool,
    pub stale: bool,
}

#[derive(Default)]
struct CacheState {
    snapshot: Option<Arc<Snapshot>>,
    last_update: Option<DateTime<Utc>>,
}

/// Last good snapshot, in memory and on disk.
///
/// A published snapshot is never mutated; `save` swaps the `Arc`, so readers
/// see either the old or the new snapshot in full.
pub struct CacheStore {
    path: PathBuf,
    stale_after: chrono::Duration,
    state: RwLock<CacheState>,
    updating: watch::Sender<bool>,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>, stale_after: chrono::Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
            state: RwLock::new(CacheState::default()),
            updating: watch::channel(false).0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted snapshot and publish it. A missing or unreadable
    /// file just means there is no cache yet.
    pub fn load(&self) -> Option<Arc<Snapshot>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no cache file");
            return None;
        }
        let snapshot = match read_snapshot(&self.path) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                warn!(path = %self.path.display(), "ignoring unreadable cache: {:#}", e);
                return None;
            }
        };

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.last_update = Some(snapshot.metadata.last_updated);
        state.snapshot = Some(Arc::clone(&snapshot));
        info!(
            path = %self.path.display(),
            trends = snapshot.metadata.total_trends,
            "cache loaded"
        );
        Some(snapshot)
    }

    /// Persist `snapshot` and publish it as current. A failed write is logged;
    /// the snapshot is still served from memory.
    pub fn save(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        if let Err(e) = write_snapshot(&self.path, &snapshot) {
            warn!(path = %self.path.display(), "cache write failed: {:#}", e);
        } else {
            info!(path = %self.path.display(), "cache saved");
        }

        let snapshot = Arc::new(snapshot);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.snapshot = Some(Arc::clone(&snapshot));
        state.last_update = Some(Utc::now());
        snapshot
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.read_state(|s| s.snapshot.clone())
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.read_state(|s| s.last_update)
    }

    pub fn is_stale(&self, max_age: chrono::Duration) -> bool {
        self.is_stale_at(Utc::now(), max_age)
    }

    /// True if nothing was ever saved or the last save is older than `max_age`.
    pub fn is_stale_at(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        match self.last_update() {
            None => true,
            Some(at) => now - at > max_age,
        }
    }

    pub fn cache_info(&self) -> CacheInfo {
        let now = Utc::now();
        let (cached, last_updated) = self.read_state(|s| (s.snapshot.is_some(), s.last_update));
        CacheInfo {
            cached,
            last_updated,
            age_minutes: last_updated.map(|at| {
                let minutes = (now - at).num_milliseconds() as f64 / 60_000.0;
                (minutes * 100.0).round() / 100.0
            }),
            update_in_progress: self.is_updating(),
            stale: self.is_stale_at(now, self.stale_after),
        }
    }

    pub fn is_updating(&self) -> bool {
        *self.updating.borrow()
    }

    /// Claim the in-progress flag. `None` if a refresh already holds it.
    pub fn try_begin_update(self: &Arc<Self>) -> Option<UpdateGuard> {
        let claimed = self.updating.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        });
        claimed.then(|| UpdateGuard {
            store: Arc::clone(self),
        })
    }

    /// Wait up to `timeout` for an in-flight refresh to finish. Returns
    /// whether the store is idle.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.updating.subscribe();
        let idle = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|busy| !*busy)).await,
            Ok(Ok(_))
        );
        idle
    }

    fn read_state<T>(&self, f: impl FnOnce(&CacheState) -> T) -> T {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }
}

/// Held for the whole of a refresh; clears the in-progress flag on drop,
/// including when the refresh panics.
pub struct UpdateGuard {
    store: Arc<CacheStore>,
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        self.store.updating.send_replace(false);
    }
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let bytes = std::fs::read(path).context("read failed")?;
    serde_json::from_slice(&bytes).context("invalid snapshot JSON")
}

/// Write via a sibling temp file and rename, so a crash mid-write never
/// leaves a truncated cache behind.
fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(snapshot)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("rename to {}", path.display()))?;
    Ok(())
}
