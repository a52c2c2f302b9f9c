pub mod http;

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::DriverError;

/// An element to act on: a CSS selector plus a text fragment the element's
/// rendered text must contain. Empty `text` matches any element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locator {
    pub css: &'static str,
    pub text: &'static str,
}

impl Locator {
    pub const fn new(css: &'static str, text: &'static str) -> Self {
        Self { css, text }
    }
}

/// One open page. Expensive: callers hold it through [`Session`] so it is
/// always released.
pub trait PageSession: Send {
    /// Wait up to `wait` for `target` to be clickable, then activate it.
    fn click(&mut self, target: &Locator, wait: Duration) -> Result<(), DriverError>;

    /// Rendered text of every element matching `css`, one entry per element,
    /// with the element's text blocks separated by newlines.
    fn item_texts(&mut self, css: &str) -> Result<Vec<String>, DriverError>;

    fn close(&mut self);
}

/// Launches page sessions and owns the directory downloads land in.
pub trait PageDriver: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn PageSession>, DriverError>;

    fn download_dir(&self) -> &Path;
}

/// Scoped page session: closed exactly once, on drop, whatever happened while
/// it was in use.
pub struct Session {
    inner: Box<dyn PageSession>,
    url: String,
}

impl Session {
    pub fn open(driver: &dyn PageDriver, url: &str) -> Result<Self, DriverError> {
        let inner = driver.open(url)?;
        Ok(Self {
            inner,
            url: url.to_string(),
        })
    }
}

impl Deref for Session {
    type Target = dyn PageSession;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DerefMut for Session {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!(url = %self.url, "closing page session");
        self.inner.close();
    }
}
