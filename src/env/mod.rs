//! Environment adapters
//!
//! The launch logic never touches a concrete runtime.  Everything it needs
//! from the host comes through the [`Environment`] trait, with session state
//! kept behind [`Storage`].
//!
//! # Module Layout
//!
//! - [`memory`]: in-memory [`Storage`] for tests and one-shot processes
//! - [`persistent`]: sled-backed [`Storage`] that survives restarts
//! - [`headless`]: non-interactive adapter that records redirects
//! - [`browser`]: interactive adapter driving the system browser and a
//!   loopback redirect listener

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::error::{Result, SmartError};

pub mod browser;
pub mod headless;
pub mod memory;
pub mod persistent;

pub use browser::BrowserEnvironment;
pub use headless::HeadlessEnvironment;
pub use memory::MemoryStorage;
pub use persistent::PersistentStorage;

/// Key-value store holding session records and the well-known pointer.
///
/// Implementations only need "last write wins" semantics.  A `get` for a key
/// that was never set (or was unset) returns `Ok(None)`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Returns the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Removes `key`.  Removing a missing key is not an error.
    async fn unset(&self, key: &str) -> Result<()>;
}

/// Runtime surface the launch flow runs against.
#[async_trait]
pub trait Environment: Send + Sync {
    /// The URL of the current page, including its query string.
    fn url(&self) -> Url;

    /// Shared storage for session records.
    fn storage(&self) -> Arc<dyn Storage>;

    /// Navigates to `url`.  In a real browser this unloads the page.
    async fn redirect(&self, url: &str) -> Result<()>;

    /// Resolves `path` against the current URL.
    fn relative(&self, path: &str) -> Result<String> {
        resolve_relative(&self.url(), path)
    }

    /// Whether this environment is driven by an interactive user agent.
    fn is_interactive(&self) -> bool {
        false
    }

    /// Whether [`replace_url`](Self::replace_url) can rewrite the current
    /// location without a navigation.
    fn supports_history_replace(&self) -> bool {
        false
    }

    /// Replaces the current location in place.
    fn replace_url(&self, _url: &Url) -> Result<()> {
        Ok(())
    }
}

/// Resolves `path` against `base`.
///
/// Absolute `http(s)` URLs and `urn:` identifiers are returned unchanged.
pub fn resolve_relative(base: &Url, path: &str) -> Result<String> {
    if path.starts_with("http") || path.starts_with("urn") {
        return Ok(path.to_string());
    }
    let resolved = base
        .join(path)
        .map_err(|e| SmartError::Config(format!("cannot resolve '{path}' against {base}: {e}")))?;
    Ok(resolved.to_string())
}

/// Returns the first non-empty value of query parameter `name`.
pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// Returns `true` when `name` appears in the query string, even if empty.
pub fn has_query_param(url: &Url, name: &str) -> bool {
    url.query_pairs().any(|(k, _)| k == name)
}
