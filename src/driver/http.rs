//! Page driver backed by plain HTTP fetches and static markup.
//!
//! Clicks follow `href` / `data-href` / `data-url` targets: CSV responses are
//! saved into the download directory, anything else replaces the current page.
//! Elements without a target (menu toggles) click as no-ops, since their menus
//! are already present in the served markup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};
use url::Url;

use super::{Locator, PageDriver, PageSession};
use crate::config::Settings;
use crate::error::DriverError;

const TARGET_ATTRS: &[&str] = &["href", "data-href", "data-url"];

pub struct HttpDriver {
    client: Client,
    timeout: Duration,
    download_dir: PathBuf,
}

impl HttpDriver {
    /// Must be called off the async runtime: the blocking client owns its own.
    pub fn new(settings: &Settings) -> Result<Self> {
        std::fs::create_dir_all(&settings.download_dir).with_context(|| {
            format!(
                "Failed to create download dir {}",
                settings.download_dir.display()
            )
        })?;
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        info!(download_dir = %settings.download_dir.display(), "HTTP page driver ready");
        Ok(Self {
            client,
            timeout: settings.request_timeout(),
            download_dir: settings.download_dir.clone(),
        })
    }
}

impl PageDriver for HttpDriver {
    fn open(&self, url: &str) -> Result<Box<dyn PageSession>, DriverError> {
        let url = Url::parse(url).map_err(|e| DriverError::Navigation(e.to_string()))?;
        let mut session = HttpSession {
            client: self.client.clone(),
            timeout: self.timeout,
            download_dir: self.download_dir.clone(),
            url,
            body: String::new(),
        };
        session.navigate(session.url.clone())?;
        Ok(Box::new(session))
    }

    fn download_dir(&self) -> &Path {
        &self.download_dir
    }
}

struct HttpSession {
    client: Client,
    timeout: Duration,
    download_dir: PathBuf,
    url: Url,
    body: String,
}

impl HttpSession {
    fn navigate(&mut self, url: Url) -> Result<(), DriverError> {
        debug!(%url, "GET");
        let resp = self.get(&url)?;
        self.body = resp.text().map_err(|e| self.request_error(e))?;
        self.url = url;
        Ok(())
    }

    /// Fetch `url`; a CSV response lands in the download dir, anything else
    /// becomes the current page.
    fn follow(&mut self, url: Url) -> Result<(), DriverError> {
        debug!(%url, "follow");
        let resp = self.get(&url)?;
        let headers = resp.headers().clone();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let disposition = headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(attachment_name);

        if content_type.contains("csv") || disposition.is_some() || url.path().ends_with(".csv") {
            let name = disposition
                .as_deref()
                .and_then(safe_file_name)
                .or_else(|| url.path_segments()?.last().and_then(safe_file_name))
                .unwrap_or_else(|| format!("export_{}", Utc::now().timestamp_millis()));
            let name = if name.ends_with(".csv") { name } else { format!("{}.csv", name) };
            let bytes = resp.bytes().map_err(|e| self.request_error(e))?;
            std::fs::write(self.download_dir.join(&name), &bytes)?;
            debug!(file = %name, bytes = bytes.len(), "download saved");
            Ok(())
        } else {
            self.body = resp.text().map_err(|e| self.request_error(e))?;
            self.url = url;
            Ok(())
        }
    }

    fn get(&self, url: &Url) -> Result<Response, DriverError> {
        self.client
            .get(url.clone())
            .send()
            .and_then(Response::error_for_status)
            .map_err(|e| self.request_error(e))
    }

    fn request_error(&self, e: reqwest::Error) -> DriverError {
        DriverError::from_request(e, self.timeout)
    }
}

impl PageSession for HttpSession {
    fn click(&mut self, target: &Locator, _wait: Duration) -> Result<(), DriverError> {
        // Static markup never changes while we wait, so the element is either
        // there now or never.
        let href = {
            let doc = Html::parse_document(&self.body);
            let el = find(&doc, target)?
                .ok_or_else(|| DriverError::NotFound(format!("{} ~ '{}'", target.css, target.text)))?;
            click_target(el)
        };
        match href {
            Some(href) => {
                let next = self
                    .url
                    .join(&href)
                    .map_err(|e| DriverError::Navigation(e.to_string()))?;
                self.follow(next)
            }
            None => Ok(()),
        }
    }

    fn item_texts(&mut self, css: &str) -> Result<Vec<String>, DriverError> {
        let selector = parse_selector(css)?;
        let doc = Html::parse_document(&self.body);
        Ok(doc.select(&selector).map(rendered_text).collect())
    }

    fn close(&mut self) {
        self.body.clear();
    }
}

fn parse_selector(css: &str) -> Result<Selector, DriverError> {
    Selector::parse(css).map_err(|e| DriverError::NotFound(format!("bad selector {}: {}", css, e)))
}

/// Innermost element matching `target`: a candidate wins only if none of its
/// descendants is also a candidate, so `*` does not resolve to `<html>`.
fn find<'a>(doc: &'a Html, target: &Locator) -> Result<Option<ElementRef<'a>>, DriverError> {
    let selector = parse_selector(target.css)?;
    let is_candidate = |el: &ElementRef| el.text().collect::<String>().contains(target.text);
    Ok(doc.select(&selector).filter(is_candidate).find(|el| {
        !el.select(&selector)
            .any(|inner| inner.id() != el.id() && is_candidate(&inner))
    }))
}

/// The link a click on `el` would follow: its own target attribute or the
/// nearest ancestor's.
fn click_target(el: ElementRef) -> Option<String> {
    std::iter::once(el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .find_map(|e| {
            TARGET_ATTRS
                .iter()
                .find_map(|attr| e.value().attr(attr))
                .map(str::to_string)
        })
}

fn rendered_text(el: ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Last path component of a server-suggested name; `None` if nothing usable
/// is left. Keeps downloads inside the download dir.
fn safe_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    match base {
        "" | "." | ".." => None,
        _ => Some(base.to_string()),
    }
}

fn attachment_name(disposition: &str) -> Option<String> {
    disposition
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
}
