use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::ApiError;
use crate::model::Snapshot;
use crate::orchestrator::Orchestrator;
use crate::store::{CacheStore, UpdateGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    UpdateTriggered,
    UpdateAlreadyRunning,
}

/// Owns every write to the cache. At most one orchestration run is in flight
/// at a time, whatever started it.
pub struct RefreshCoordinator {
    store: Arc<CacheStore>,
    orchestrator: Arc<Orchestrator>,
    geo: String,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<CacheStore>, orchestrator: Arc<Orchestrator>, geo: impl Into<String>) -> Self {
        Self {
            store,
            orchestrator,
            geo: geo.into(),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Load the persisted snapshot; with nothing usable on disk, kick off the
    /// first refresh in the background. Returns whether a cache was loaded.
    pub fn warm_start(&self) -> bool {
        if self.store.load().is_some() {
            return true;
        }
        info!("no cache found, starting initial scrape");
        self.trigger();
        false
    }

    /// Start a background refresh of the default geography and return at
    /// once. A no-op while another refresh is running.
    pub fn trigger(&self) -> TriggerStatus {
        let Some(guard) = self.store.try_begin_update() else {
            info!("update already in progress, skipping");
            return TriggerStatus::UpdateAlreadyRunning;
        };
        info!(geo = %self.geo, "background update started");
        let handle = self.spawn_run(guard, self.geo.clone());
        tokio::spawn(async move {
            match handle.await {
                Ok(snapshot) => info!(
                    total_trends = snapshot.metadata.total_trends,
                    "background update completed"
                ),
                Err(e) => error!("background update failed: {}", e),
            }
        });
        TriggerStatus::UpdateTriggered
    }

    /// Refresh `geo` and wait for the result. If another refresh is in
    /// flight, wait for it (up to `wait`) rather than start a second one, and
    /// reuse its snapshot when it covers `geo`.
    pub async fn refresh_now(&self, geo: &str, wait: Duration) -> Result<Arc<Snapshot>, ApiError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(guard) = self.store.try_begin_update() {
                info!(geo, "foreground update started");
                return self
                    .spawn_run(guard, geo.to_string())
                    .await
                    .map_err(|e| ApiError::ScrapeFailed(e.to_string()));
            }

            let before = self.store.last_update();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.store.wait_until_idle(remaining).await {
                return Err(ApiError::ScrapeFailed("a refresh is still running".to_string()));
            }
            if self.store.last_update() != before {
                if let Some(snapshot) = self.store.snapshot().filter(|s| s.geography == geo) {
                    return Ok(snapshot);
                }
            }
        }
    }

    /// Run the orchestrator on the blocking pool. `guard` moves into the
    /// worker, so the in-progress flag clears when the run ends, however it ends.
    fn spawn_run(&self, guard: UpdateGuard, geo: String) -> JoinHandle<Arc<Snapshot>> {
        let store = Arc::clone(&self.store);
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let snapshot = orchestrator.run_all(&geo, None);
            store.save(snapshot)
        })
    }

    /// Trigger a refresh every `period` until `shutdown` fires. The first
    /// tick is one full period out. Cancelling stops new triggers only.
    pub fn spawn_scheduler(self: Arc<Self>, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("scheduled auto-updates every {:?}", period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        info!("scheduled update triggered");
                        self.trigger();
                    }
                }
            }
        })
    }
}
