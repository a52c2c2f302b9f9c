//! Fallback strategy: read trends off the rendered listing itself.

use std::sync::LazyLock;

use regex::Regex;

use super::Outcome;
use crate::driver::Session;
use crate::error::DriverError;
use crate::model::TrendRecord;

pub const ITEM_SELECTOR: &str = "table tbody tr, .feed-item";

static MAGNITUDE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[KM]\+|\+$").unwrap());

pub fn run(session: &mut Session) -> Outcome {
    match session.item_texts(ITEM_SELECTOR) {
        Ok(texts) => Outcome::Success(parse_items(&texts)),
        Err(DriverError::Timeout(_)) => Outcome::Timeout,
        Err(DriverError::NotFound(_)) => Outcome::NotFound,
        Err(e) => Outcome::ParseError(e.to_string()),
    }
}

/// One record per item with at least one non-blank line. Ranks count kept
/// items only, so they stay dense.
pub fn parse_items(texts: &[String]) -> Vec<TrendRecord> {
    let mut records = Vec::new();
    for text in texts {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let Some(first) = lines.first() else {
            continue;
        };

        let mut rec = TrendRecord::new(records.len() as u32 + 1, first.to_lowercase());
        rec.traffic = lines
            .iter()
            .find(|l| MAGNITUDE_RE.is_match(l))
            .map(|l| l.to_string());
        rec.article_title = lines.get(1).map(|l| l.to_string());
        records.push(rec);
    }
    records
}

#[cfg(test)]
mod tests {
    use scraper::{Html, Selector};

    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn title_traffic_and_article() {
        let recs = parse_items(&texts(&["Cricket World Cup\nFinal tonight\n1M+ searches"]));
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].title, "cricket world cup");
        assert_eq!(recs[0].article_title.as_deref(), Some("Final tonight"));
        assert_eq!(recs[0].traffic.as_deref(), Some("1M+ searches"));
        assert_eq!(recs[0].article_source, None);
    }

    #[test]
    fn trailing_plus_counts_as_magnitude() {
        let recs = parse_items(&texts(&["Monsoon\n500+"]));
        assert_eq!(recs[0].traffic.as_deref(), Some("500+"));

        let recs = parse_items(&texts(&["Monsoon\nC++ tutorial"]));
        assert_eq!(recs[0].traffic, None);
    }

    #[test]
    fn blank_items_do_not_leave_rank_gaps() {
        let recs = parse_items(&texts(&["A", "", "  \n \n", "B", "C\n10K+"]));
        let ranks: Vec<u32> = recs.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, [1, 2, 3]);
        assert_eq!(recs[1].title, "b");
        assert_eq!(recs[1].traffic, None);
    }

    #[test]
    fn fixture_page_rows() {
        let html = std::fs::read_to_string("tests/fixtures/trending_page.html").unwrap();
        let doc = Html::parse_document(&html);
        let sel = Selector::parse(ITEM_SELECTOR).unwrap();
        let items: Vec<String> = doc
            .select(&sel)
            .map(|el| {
                el.text()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect();

        let recs = parse_items(&items);
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0].title, "india vs australia");
        assert_eq!(recs[0].traffic.as_deref(), Some("500K+"));
        assert_eq!(recs[2].rank, 3);
        assert_eq!(recs[2].title, "diwali 2026");
    }
}
