//! Primary strategy: the listing's "Export → Download CSV" action.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use csv::StringRecord;
use tracing::{debug, warn};

use super::{Outcome, Timing};
use crate::driver::{Locator, Session};
use crate::error::DriverError;
use crate::model::TrendRecord;

pub const EXPORT_BUTTON: Locator = Locator::new("button", "Export");

/// Menu entries for the CSV download, tried in order; first hit wins.
pub const DOWNLOAD_CSV: &[Locator] = &[
    Locator::new("span", "Download CSV"),
    Locator::new("div", "Download CSV"),
    Locator::new("*", "Download CSV"),
    Locator::new("button", "CSV"),
    Locator::new("div[role='menuitem']", "CSV"),
];

// Header names differ between locales and export versions.
pub const TITLE_ALIASES: &[&str] = &["Trends", "Query", "Title", "Search term"];
pub const TRAFFIC_ALIASES: &[&str] = &["Search volume", "Traffic", "Approximate searches"];
pub const STARTED_ALIASES: &[&str] = &["Started"];
pub const ENDED_ALIASES: &[&str] = &["Ended"];
pub const BREAKDOWN_ALIASES: &[&str] = &["Trend breakdown"];
pub const EXPLORE_ALIASES: &[&str] = &["Explore link"];

pub fn run(session: &mut Session, download_dir: &Path, timing: &Timing) -> Outcome {
    match session.click(&EXPORT_BUTTON, timing.export_wait) {
        Ok(()) => debug!("export control clicked"),
        Err(DriverError::Timeout(_)) => return Outcome::Timeout,
        Err(e) => {
            debug!("export control unavailable: {}", e);
            return Outcome::NotFound;
        }
    }
    std::thread::sleep(timing.menu_delay);

    let mut outcome = Outcome::NotFound;
    for target in DOWNLOAD_CSV {
        let before = match csv_files(download_dir) {
            Ok(files) => files,
            Err(e) => return Outcome::ParseError(format!("download dir: {}", e)),
        };
        if let Err(e) = session.click(target, Duration::ZERO) {
            debug!(css = target.css, text = target.text, "menu entry: {}", e);
            continue;
        }
        match wait_for_download(download_dir, &before, timing.download_timeout, timing.poll_interval) {
            Some(path) => {
                debug!(file = %path.display(), "export downloaded");
                let parsed = parse_file(&path);
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(file = %path.display(), "could not remove export: {}", e);
                }
                return parsed;
            }
            None => {
                warn!(css = target.css, "no download after {:?}", timing.download_timeout);
                outcome = Outcome::Timeout;
            }
        }
    }
    outcome
}

/// `*.csv` files currently in `dir`.
pub fn csv_files(dir: &Path) -> io::Result<HashSet<PathBuf>> {
    let mut files = HashSet::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if is_csv {
            files.insert(path);
        }
    }
    Ok(files)
}

/// Poll `dir` every `poll` until a CSV not in `before` appears, or `timeout`.
pub fn wait_for_download(
    dir: &Path,
    before: &HashSet<PathBuf>,
    timeout: Duration,
    poll: Duration,
) -> Option<PathBuf> {
    let attempts = (timeout.as_millis() / poll.as_millis().max(1)).max(1);
    for _ in 0..attempts {
        std::thread::sleep(poll);
        let Ok(after) = csv_files(dir) else { continue };
        let mut fresh: Vec<PathBuf> = after.difference(before).cloned().collect();
        fresh.sort();
        if let Some(path) = fresh.into_iter().next() {
            return Some(path);
        }
    }
    None
}

pub fn parse_file(path: &Path) -> Outcome {
    match File::open(path) {
        Ok(f) => parse_export(f),
        Err(e) => Outcome::ParseError(e.to_string()),
    }
}

/// Column positions resolved from the header row.
#[derive(Debug, PartialEq)]
struct Columns {
    title: usize,
    traffic: Option<usize>,
    started: Option<usize>,
    ended: Option<usize>,
    breakdown: Option<usize>,
    explore: Option<usize>,
}

impl Columns {
    fn resolve(headers: &StringRecord) -> Option<Self> {
        let names: Vec<&str> = headers
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim())
            .collect();
        let find = |aliases: &[&str]| {
            aliases
                .iter()
                .find_map(|alias| names.iter().position(|n| n.eq_ignore_ascii_case(alias)))
        };
        Some(Self {
            title: find(TITLE_ALIASES)?,
            traffic: find(TRAFFIC_ALIASES),
            started: find(STARTED_ALIASES),
            ended: find(ENDED_ALIASES),
            breakdown: find(BREAKDOWN_ALIASES),
            explore: find(EXPLORE_ALIASES),
        })
    }
}

/// Parse an export. Rows with a blank title are dropped; ranks count kept rows.
pub fn parse_export<R: Read>(reader: R) -> Outcome {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = match rdr.headers() {
        Ok(h) => h.clone(),
        Err(e) => return Outcome::ParseError(e.to_string()),
    };
    let Some(cols) = Columns::resolve(&headers) else {
        return Outcome::ParseError(format!("no title column in {:?}", headers));
    };

    let mut records = Vec::new();
    for row in rdr.records() {
        let row = match row {
            Ok(r) => r,
            Err(e) => return Outcome::ParseError(e.to_string()),
        };
        let cell = |idx: Option<usize>| {
            idx.and_then(|i| row.get(i))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let title = row.get(cols.title).unwrap_or_default().trim().to_lowercase();
        if title.is_empty() {
            continue;
        }

        let mut rec = TrendRecord::new(records.len() as u32 + 1, title);
        rec.traffic = cell(cols.traffic);
        rec.started = cell(cols.started);
        rec.ended = cell(cols.ended);
        rec.trend_breakdown = cell(cols.breakdown);
        rec.explore_link = cell(cols.explore);
        records.push(rec);
    }
    Outcome::Success(records)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::driver::fake::{ClickEffect, FakeDriver};
    use crate::extract::test_timing;

    fn records(outcome: Outcome) -> Vec<TrendRecord> {
        match outcome {
            Outcome::Success(r) => r,
            other => panic!("expected success, got {}", other),
        }
    }

    #[test]
    fn parses_fixture_export() {
        let f = File::open("tests/fixtures/trending_export.csv").unwrap();
        let recs = records(parse_export(f));
        assert_eq!(recs.len(), 4);
        assert_eq!(recs[0].title, "india vs australia");
        assert_eq!(recs[0].traffic.as_deref(), Some("500K+"));
        assert!(recs[0].trend_breakdown.as_deref().unwrap().contains("ind vs aus"));
        assert!(recs[0].explore_link.as_deref().unwrap().starts_with("https://"));
        let ranks: Vec<u32> = recs.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, [1, 2, 3, 4]);
    }

    #[test]
    fn ranks_skip_blank_titles() {
        let csv = "Trends,Search volume\nAlpha,1K+\n   ,2K+\nBeta,\n";
        let recs = records(parse_export(csv.as_bytes()));
        assert_eq!(recs.len(), 2);
        assert_eq!((recs[1].rank, recs[1].title.as_str()), (2, "beta"));
        assert_eq!(recs[1].traffic, None);
    }

    #[test]
    fn alias_order_and_bom() {
        let csv = "\u{feff}Search term,Approximate searches\nDiwali Sale,20K+\n";
        let recs = records(parse_export(csv.as_bytes()));
        assert_eq!(recs[0].title, "diwali sale");
        assert_eq!(recs[0].traffic.as_deref(), Some("20K+"));

        let headers = StringRecord::from(vec!["Query", "Trends"]);
        // "Trends" outranks "Query" even when it comes second
        assert_eq!(Columns::resolve(&headers).unwrap().title, 1);
    }

    #[test]
    fn unknown_headers_are_a_parse_error() {
        let csv = "Name,Volume\nAlpha,1K+\n";
        assert!(matches!(parse_export(csv.as_bytes()), Outcome::ParseError(_)));
    }

    #[test]
    fn duplicates_are_kept() {
        let csv = "Title\nsame\nSame\n";
        let recs = records(parse_export(csv.as_bytes()));
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].title, recs[1].title);
    }

    #[test]
    fn later_menu_candidate_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FakeDriver::new(dir.path())
            .on_click(EXPORT_BUTTON, ClickEffect::Noop)
            .on_click(DOWNLOAD_CSV[3], ClickEffect::Download("a.csv".into(), "Title\nx\n".into()));
        let d: Arc<dyn crate::driver::PageDriver> = Arc::new(driver.clone());
        let mut session = Session::open(d.as_ref(), "http://x").unwrap();

        let recs = records(run(&mut session, dir.path(), &test_timing()));
        assert_eq!(recs.len(), 1);
        let clicked = driver.clicked.lock().unwrap().clone();
        assert_eq!(clicked.len(), 5); // export + four menu candidates
        assert_eq!(clicked[4], DOWNLOAD_CSV[3]);
        // staged export is cleaned up
        assert!(csv_files(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn click_without_download_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FakeDriver::new(dir.path())
            .on_click(EXPORT_BUTTON, ClickEffect::Noop)
            .on_click(DOWNLOAD_CSV[0], ClickEffect::Noop);
        let mut session = Session::open(&driver, "http://x").unwrap();
        assert!(matches!(run(&mut session, dir.path(), &test_timing()), Outcome::Timeout));
    }

    #[test]
    fn export_control_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let driver = FakeDriver::new(dir.path()).on_click(EXPORT_BUTTON, ClickEffect::Timeout);
        let mut session = Session::open(&driver, "http://x").unwrap();
        assert!(matches!(run(&mut session, dir.path(), &test_timing()), Outcome::Timeout));
    }

    #[test]
    fn preexisting_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.csv"), "Title\nold\n").unwrap();
        let before = csv_files(dir.path()).unwrap();
        let found = wait_for_download(
            dir.path(),
            &before,
            Duration::from_millis(20),
            Duration::from_millis(10),
        );
        assert_eq!(found, None);
    }
}
