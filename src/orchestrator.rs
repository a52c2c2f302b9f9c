use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info};

use crate::categories;
use crate::extract::Extractor;
use crate::model::{CategoryResult, Snapshot, SnapshotMetadata, TrendRecord, SOURCE_TAG};

/// Where per-category trends come from. An `Err` (or a panic) is a
/// category-level failure: recorded as zero trends, the run carries on.
pub trait TrendSource: Send + Sync {
    fn fetch(&self, geo: &str, category_id: u32) -> Result<Vec<TrendRecord>>;
}

impl TrendSource for Extractor {
    fn fetch(&self, geo: &str, category_id: u32) -> Result<Vec<TrendRecord>> {
        Ok(self.extract_category(geo, category_id))
    }
}

/// Runs extraction over a set of categories, one at a time.
pub struct Orchestrator {
    source: Arc<dyn TrendSource>,
}

impl Orchestrator {
    pub fn new(source: Arc<dyn TrendSource>) -> Self {
        Self { source }
    }

    pub fn run_all(&self, geo: &str, category_ids: Option<&[u32]>) -> Snapshot {
        self.run_with(geo, category_ids, |_, _| {})
    }

    /// Like [`run_all`](Self::run_all), calling `on_category(index, result)`
    /// after each category completes.
    pub fn run_with(
        &self,
        geo: &str,
        category_ids: Option<&[u32]>,
        mut on_category: impl FnMut(usize, &CategoryResult),
    ) -> Snapshot {
        let ids = match category_ids {
            Some(ids) => ids.to_vec(),
            None => categories::default_ids(),
        };
        info!(geo, categories = ids.len(), "starting scrape");

        let started = Utc::now();
        let t0 = Instant::now();
        let mut results = Vec::with_capacity(ids.len());
        let mut total_trends = 0;

        for (idx, &id) in ids.iter().enumerate() {
            let name = categories::display_name(id);
            info!("[{}/{}] {}", idx + 1, ids.len(), name);

            let trends = self.fetch_guarded(geo, id, &name);
            let result = CategoryResult::new(id, name.into_owned(), trends);
            total_trends += result.trend_count;
            on_category(idx, &result);
            results.push(result);
        }

        let finished = Utc::now();
        let snapshot = Snapshot {
            geography: geo.to_string(),
            metadata: SnapshotMetadata {
                scrape_started: started,
                last_updated: finished,
                total_trends,
                categories_count: results.len(),
                scrape_duration_seconds: t0.elapsed().as_secs_f64(),
                source: SOURCE_TAG.to_string(),
            },
            categories: results,
        };
        info!(
            total_trends,
            secs = snapshot.metadata.scrape_duration_seconds,
            "scrape complete"
        );
        snapshot
    }

    fn fetch_guarded(&self, geo: &str, id: u32, name: &str) -> Vec<TrendRecord> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.source.fetch(geo, id))) {
            Ok(Ok(trends)) => trends,
            Ok(Err(e)) => {
                error!(category = name, "category failed: {:#}", e);
                Vec::new()
            }
            Err(_) => {
                error!(category = name, "category panicked");
                Vec::new()
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeSource;
    use super::*;

    #[test]
    fn defaults_cover_registry_without_sentinel() {
        let orch = Orchestrator::new(Arc::new(FakeSource::with(&[(17, 3), (18, 2)])));
        let snap = orch.run_all("IN", None);
        assert_eq!(snap.categories.len(), categories::default_ids().len());
        assert!(snap.category("All Categories").is_none());
        assert_eq!(snap.metadata.total_trends, 5);
        assert_eq!(snap.metadata.categories_count, snap.categories.len());
        assert_eq!(snap.metadata.source, SOURCE_TAG);
        assert!(snap.metadata.last_updated >= snap.metadata.scrape_started);
    }

    #[test]
    fn failures_are_isolated_per_category() {
        let source = FakeSource {
            failing: vec![2],
            panicking: vec![3],
            ..FakeSource::with(&[(1, 4), (2, 9), (3, 9), (4, 1)])
        };
        let orch = Orchestrator::new(Arc::new(source));
        let snap = orch.run_all("US", Some(&[1, 2, 3, 4]));

        let counts: Vec<usize> = snap.categories.iter().map(|c| c.trend_count).collect();
        assert_eq!(counts, [4, 0, 0, 1]);
        assert_eq!(snap.metadata.total_trends, 5);
        assert_eq!(snap.geography, "US");
    }

    #[test]
    fn totals_and_ranks_are_consistent() {
        let orch = Orchestrator::new(Arc::new(FakeSource::with(&[(5, 3), (6, 0), (7, 2)])));
        let snap = orch.run_all("IN", Some(&[5, 6, 7]));
        let sum: usize = snap.categories.iter().map(|c| c.trend_count).sum();
        assert_eq!(snap.metadata.total_trends, sum);
        for c in &snap.categories {
            assert_eq!(c.trend_count, c.trends.len());
            let ranks: Vec<u32> = c.trends.iter().map(|t| t.rank).collect();
            let dense: Vec<u32> = (1..=c.trends.len() as u32).collect();
            assert_eq!(ranks, dense);
        }
        // empty category is recorded, not dropped
        assert_eq!(snap.category("Games").map(|c| c.trend_count), Some(0));
        assert_eq!(snap.category("Food and drink").map(|c| c.trend_count), Some(3));
    }

    #[test]
    fn unknown_ids_get_synthesized_names() {
        let orch = Orchestrator::new(Arc::new(FakeSource::with(&[(42, 1)])));
        let mut seen = Vec::new();
        let snap = orch.run_with("IN", Some(&[42]), |idx, c| seen.push((idx, c.category_name.clone())));
        assert_eq!(snap.categories[0].category_name, "Category 42");
        assert_eq!(seen, [(0, "Category 42".to_string())]);
    }
}
