use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Tag written into `metadata.source` for snapshots produced by this crate.
pub const SOURCE_TAG: &str = "csv_export";

/// One ranked trend as captured from a category listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRecord {
    pub rank: u32,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_breakdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explore_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_source: Option<String>,
    /// Capture time of this record, not of the session that produced it.
    pub timestamp: DateTime<Utc>,
}

impl TrendRecord {
    /// A bare record stamped with the current time.
    pub fn new(rank: u32, title: String) -> Self {
        Self {
            rank,
            title,
            traffic: None,
            started: None,
            ended: None,
            trend_breakdown: None,
            explore_link: None,
            article_title: None,
            article_source: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub category_id: u32,
    pub category_name: String,
    pub trend_count: usize,
    pub trends: Vec<TrendRecord>,
    pub last_updated: DateTime<Utc>,
}

impl CategoryResult {
    pub fn new(category_id: u32, category_name: String, trends: Vec<TrendRecord>) -> Self {
        Self {
            category_id,
            category_name,
            trend_count: trends.len(),
            trends,
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub scrape_started: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub total_trends: usize,
    pub categories_count: usize,
    pub scrape_duration_seconds: f64,
    pub source: String,
}

/// One complete orchestration result. Published whole, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub geography: String,
    /// Serialized as an object keyed by category name, in scrape order.
    #[serde(with = "by_name")]
    pub categories: Vec<CategoryResult>,
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    pub fn category(&self, name: &str) -> Option<&CategoryResult> {
        self.categories.iter().find(|c| c.category_name == name)
    }
}

/// Category results serialized as an object keyed by name, order preserved.
pub struct CategoryMap<'a>(pub &'a [CategoryResult]);

impl Serialize for CategoryMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        by_name::serialize(self.0, serializer)
    }
}

/// Keeps the category object in insertion order on both sides of the wire.
mod by_name {
    use super::*;

    pub fn serialize<S: Serializer>(
        categories: &[CategoryResult],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(categories.len()))?;
        for c in categories {
            map.serialize_entry(&c.category_name, c)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<CategoryResult>, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = Vec<CategoryResult>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of category results keyed by name")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((_, result)) = access.next_entry::<String, CategoryResult>()? {
                    out.push(result);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Snapshot with `per_category` trends in each named category.
    pub fn snapshot(geo: &str, names: &[(u32, &str)], per_category: usize) -> Snapshot {
        let now = Utc::now();
        let categories: Vec<CategoryResult> = names
            .iter()
            .map(|(id, name)| {
                let trends = (1..=per_category)
                    .map(|rank| {
                        let mut t = TrendRecord::new(rank as u32, format!("{} trend {}", name, rank).to_lowercase());
                        t.traffic = Some("10K+".to_string());
                        t
                    })
                    .collect();
                CategoryResult::new(*id, name.to_string(), trends)
            })
            .collect();
        Snapshot {
            geography: geo.to_string(),
            metadata: SnapshotMetadata {
                scrape_started: now,
                last_updated: now,
                total_trends: categories.iter().map(|c| c.trend_count).sum(),
                categories_count: categories.len(),
                scrape_duration_seconds: 1.5,
                source: SOURCE_TAG.to_string(),
            },
            categories,
        }
    }
}
