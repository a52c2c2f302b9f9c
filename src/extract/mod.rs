pub mod export;
pub mod listing;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::categories;
use crate::config::Settings;
use crate::driver::{PageDriver, Session};
use crate::model::TrendRecord;

/// Result of one extraction strategy. The pipeline dispatches on this instead
/// of treating strategy failures as errors.
#[derive(Debug)]
pub enum Outcome {
    Success(Vec<TrendRecord>),
    NotFound,
    Timeout,
    ParseError(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success(r) => write!(f, "{} records", r.len()),
            Outcome::NotFound => f.write_str("not found"),
            Outcome::Timeout => f.write_str("timed out"),
            Outcome::ParseError(e) => write!(f, "parse error: {}", e),
        }
    }
}

/// Waits used while driving a listing page.
#[derive(Debug, Clone)]
pub struct Timing {
    /// After navigation, for dynamic content to render.
    pub settle: Duration,
    /// For the Export control to become clickable.
    pub export_wait: Duration,
    /// After opening the Export menu.
    pub menu_delay: Duration,
    /// For a new export file to show up after clicking download.
    pub download_timeout: Duration,
    pub poll_interval: Duration,
}

impl From<&Settings> for Timing {
    fn from(s: &Settings) -> Self {
        Self {
            settle: s.settle_delay(),
            export_wait: s.export_wait(),
            menu_delay: s.menu_delay(),
            download_timeout: s.download_timeout(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Turns one category listing into ranked trend records.
pub struct Extractor {
    driver: Arc<dyn PageDriver>,
    base_url: String,
    timing: Timing,
}

impl Extractor {
    pub fn new(driver: Arc<dyn PageDriver>, base_url: impl Into<String>, timing: Timing) -> Self {
        Self {
            driver,
            base_url: base_url.into(),
            timing,
        }
    }

    /// Export first, rendered listing second. Never fails: every problem ends
    /// in an empty or partial result.
    pub fn extract_category(&self, geo: &str, category_id: u32) -> Vec<TrendRecord> {
        let name = categories::display_name(category_id);
        let url = categories::listing_url(&self.base_url, geo, category_id);
        info!(category = %name, %url, "loading listing");

        let mut session = match Session::open(self.driver.as_ref(), &url) {
            Ok(s) => s,
            Err(e) => {
                warn!(category = %name, "could not open listing: {}", e);
                return Vec::new();
            }
        };
        std::thread::sleep(self.timing.settle);

        let records = match export::run(&mut session, self.driver.download_dir(), &self.timing) {
            Outcome::Success(records) if !records.is_empty() => {
                debug!(category = %name, "export strategy succeeded");
                records
            }
            outcome => {
                info!(category = %name, "export {}; falling back to listing", outcome);
                match listing::run(&mut session) {
                    Outcome::Success(records) => records,
                    outcome => {
                        warn!(category = %name, "listing fallback {}", outcome);
                        Vec::new()
                    }
                }
            }
        };

        if records.is_empty() {
            warn!(category = %name, "no trends found");
        } else {
            info!(category = %name, trends = records.len(), "extracted");
        }
        records
    }
}

#[cfg(test)]
pub(crate) fn test_timing() -> Timing {
    Timing {
        settle: Duration::ZERO,
        export_wait: Duration::from_millis(10),
        menu_delay: Duration::ZERO,
        download_timeout: Duration::from_millis(30),
        poll_interval: Duration::from_millis(10),
    }
}
