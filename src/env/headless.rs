//! Non-interactive environment for servers, CLIs and tests

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use url::Url;

use super::{Environment, MemoryStorage, Storage};
use crate::error::Result;

/// [`Environment`] with a programmatically set URL.
///
/// Redirects are recorded rather than followed; inspect them with
/// [`redirects`](Self::redirects).  The current URL only changes through
/// [`set_url`](Self::set_url), which is how a test simulates the page load
/// that follows a redirect.
///
/// # Examples
///
/// ```
/// use smart_launch::env::{Environment, HeadlessEnvironment};
/// use url::Url;
///
/// let env = HeadlessEnvironment::with_memory_storage(
///     Url::parse("http://localhost/app/launch?iss=http://fhir.example.com").unwrap(),
/// );
/// assert_eq!(env.relative(".").unwrap(), "http://localhost/app/");
/// assert!(!env.is_interactive());
/// ```
pub struct HeadlessEnvironment {
    url: RwLock<Url>,
    storage: Arc<dyn Storage>,
    redirects: Mutex<Vec<String>>,
}

impl HeadlessEnvironment {
    /// Creates an environment at `url` using the given storage.
    pub fn new(url: Url, storage: Arc<dyn Storage>) -> Self {
        Self {
            url: RwLock::new(url),
            storage,
            redirects: Mutex::new(Vec::new()),
        }
    }

    /// Creates an environment at `url` with a fresh [`MemoryStorage`].
    pub fn with_memory_storage(url: Url) -> Self {
        Self::new(url, Arc::new(MemoryStorage::new()))
    }

    /// Moves the environment to `url`, as if the page had been reloaded there.
    pub fn set_url(&self, url: Url) {
        *self.url.write().unwrap_or_else(|e| e.into_inner()) = url;
    }

    /// Every redirect target seen so far, oldest first.
    pub fn redirects(&self) -> Vec<String> {
        self.redirects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The most recent redirect target.
    pub fn last_redirect(&self) -> Option<String> {
        self.redirects().pop()
    }
}

#[async_trait]
impl Environment for HeadlessEnvironment {
    fn url(&self) -> Url {
        self.url.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }

    async fn redirect(&self, url: &str) -> Result<()> {
        tracing::debug!(to = url, "headless redirect recorded");
        self.redirects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
        Ok(())
    }
}
