use serde::Serialize;

use crate::error::ApiError;
use crate::model::{CategoryMap, CategoryResult, Snapshot, SnapshotMetadata, TrendRecord};
use crate::store::CacheInfo;

/// A trend tagged with where it came from.
#[derive(Debug, Serialize)]
pub struct FlatTrend<'a> {
    #[serde(flatten)]
    pub record: &'a TrendRecord,
    pub category: &'a str,
    pub category_id: u32,
    pub geography: &'a str,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum TrendsView<'a> {
    Grouped {
        geography: &'a str,
        categories: CategoryMap<'a>,
        metadata: &'a SnapshotMetadata,
        cache_info: CacheInfo,
    },
    Flat {
        geography: &'a str,
        metadata: &'a SnapshotMetadata,
        trends: Vec<FlatTrend<'a>>,
        total_count: usize,
        cache_info: CacheInfo,
    },
}

/// Shape `snapshot` for a client: optionally narrowed to one category by
/// name, either grouped or flattened in category order.
pub fn view<'a>(
    snapshot: &'a Snapshot,
    category: Option<&str>,
    flat: bool,
    cache_info: CacheInfo,
) -> Result<TrendsView<'a>, ApiError> {
    let selected: &'a [CategoryResult] = match category {
        None => &snapshot.categories,
        Some(name) => {
            let c = snapshot
                .category(name)
                .ok_or_else(|| ApiError::CategoryNotFound(name.to_string()))?;
            std::slice::from_ref(c)
        }
    };

    if !flat {
        return Ok(TrendsView::Grouped {
            geography: &snapshot.geography,
            categories: CategoryMap(selected),
            metadata: &snapshot.metadata,
            cache_info,
        });
    }

    let trends: Vec<FlatTrend> = selected
        .iter()
        .flat_map(|c| {
            c.trends.iter().map(move |record| FlatTrend {
                record,
                category: &c.category_name,
                category_id: c.category_id,
                geography: &snapshot.geography,
            })
        })
        .collect();
    Ok(TrendsView::Flat {
        geography: &snapshot.geography,
        metadata: &snapshot.metadata,
        total_count: trends.len(),
        trends,
        cache_info,
    })
}
