use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "trends.toml";
const ENV_PREFIX: &str = "TRENDS";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Runtime settings. Layered: defaults < `trends.toml` < `TRENDS_*` env < CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub geo: String,
    pub base_url: String,
    pub cache_file: PathBuf,
    pub download_dir: PathBuf,
    pub bind: String,
    pub refresh_interval_secs: u64,
    pub stale_after_minutes: u64,
    pub settle_delay_secs: u64,
    pub export_wait_secs: u64,
    pub menu_delay_secs: u64,
    pub download_timeout_secs: u64,
    pub cold_start_wait_secs: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            geo: "IN".to_string(),
            base_url: "https://trends.google.com/trending".to_string(),
            cache_file: PathBuf::from("trends_cache.json"),
            download_dir: PathBuf::from("downloads"),
            bind: "0.0.0.0:8888".to_string(),
            refresh_interval_secs: 120,
            stale_after_minutes: 2,
            settle_delay_secs: 3,
            export_wait_secs: 20,
            menu_delay_secs: 3,
            download_timeout_secs: 20,
            cold_start_wait_secs: 120,
            request_timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the optional config file and the environment.
    /// A missing file is fine; a malformed one is not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let settings: Settings = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(
                File::new(&file.to_string_lossy(), FileFormat::Toml).required(path.is_some()),
            )
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()
            .with_context(|| format!("Failed to read settings ({})", file.display()))?
            .try_deserialize()
            .context("Invalid settings")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;
        if self.refresh_interval_secs == 0 {
            bail!("refresh_interval_secs must be greater than zero");
        }
        if self.geo.trim().is_empty() {
            bail!("geo must not be empty");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.bind))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_after_minutes as i64)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn export_wait(&self) -> Duration {
        Duration::from_secs(self.export_wait_secs)
    }

    pub fn menu_delay(&self) -> Duration {
        Duration::from_secs(self.menu_delay_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn cold_start_wait(&self) -> Duration {
        Duration::from_secs(self.cold_start_wait_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_constants() {
        let s = Settings::default();
        assert_eq!(s.geo, "IN");
        assert_eq!(s.refresh_interval(), Duration::from_secs(120));
        assert_eq!(s.stale_after(), chrono::Duration::minutes(2));
        assert_eq!(s.bind_addr().unwrap().port(), 8888);
        s.validate().unwrap();
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trends.toml");
        std::fs::write(
            &path,
            "geo = \"US\"\nrefresh_interval_secs = 300\ncache_file = \"/tmp/x.json\"\n",
        )
        .unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.geo, "US");
        assert_eq!(s.refresh_interval_secs, 300);
        assert_eq!(s.cache_file, PathBuf::from("/tmp/x.json"));
        // untouched keys keep their defaults
        assert_eq!(s.download_timeout_secs, 20);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn rejects_bad_values() {
        let s = Settings {
            bind: "not-an-addr".into(),
            ..Settings::default()
        };
        assert!(s.validate().is_err());

        let s = Settings {
            refresh_interval_secs: 0,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }
}
