//! Interactive environment driving the system browser
//!
//! A desktop app has no page to unload, so the browser's round trip is
//! modelled explicitly:
//!
//! 1. [`BrowserEnvironment::bind_callback`] binds a loopback listener on the
//!    host and port of the redirect URI.
//! 2. [`Environment::redirect`] opens the authorization URL in the user's
//!    browser.
//! 3. [`BrowserEnvironment::await_callback`] accepts the browser's request to
//!    the redirect URI and makes it the current URL, the equivalent of the
//!    page load that follows the redirect.

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use url::Url;

use super::{Environment, Storage};
use crate::error::{Result, SmartError};

const CALLBACK_RESPONSE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nAuthorization complete. You may close this tab.";

/// Interactive [`Environment`] for desktop launches.
pub struct BrowserEnvironment {
    url: RwLock<Url>,
    callback_base: Url,
    storage: Arc<dyn Storage>,
    history_replace: bool,
    open_browser: bool,
    navigations: Mutex<Vec<String>>,
}

impl BrowserEnvironment {
    /// Creates an environment whose current page is `url`.
    ///
    /// History replacement is supported and redirects open the system
    /// browser; both can be switched off with the builder methods.
    pub fn new(url: Url, storage: Arc<dyn Storage>) -> Self {
        Self {
            callback_base: url.clone(),
            url: RwLock::new(url),
            storage,
            history_replace: true,
            open_browser: true,
            navigations: Mutex::new(Vec::new()),
        }
    }

    /// Sets whether the current URL can be rewritten without a navigation.
    pub fn with_history_replace(mut self, supported: bool) -> Self {
        self.history_replace = supported;
        self
    }

    /// Sets whether [`Environment::redirect`] launches the system browser.
    pub fn with_browser_launch(mut self, enabled: bool) -> Self {
        self.open_browser = enabled;
        self
    }

    /// Navigation targets seen so far, oldest first.
    pub fn navigations(&self) -> Vec<String> {
        self.navigations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_url(&self, url: Url) {
        *self.url.write().unwrap_or_else(|e| e.into_inner()) = url;
    }

    /// Binds a loopback listener on the host and port of `redirect_uri`.
    ///
    /// Bind before redirecting so the browser's callback cannot arrive
    /// ahead of the listener.
    pub async fn bind_callback(redirect_uri: &Url) -> Result<TcpListener> {
        let host = redirect_uri.host_str().unwrap_or("127.0.0.1");
        let port = redirect_uri.port_or_known_default().unwrap_or(80);
        let listener = TcpListener::bind((host, port)).await.map_err(|e| {
            SmartError::Config(format!("failed to bind redirect listener {host}:{port}: {e}"))
        })?;
        Ok(listener)
    }

    /// Accepts the callback request on `listener` and loads it as the
    /// current URL.
    ///
    /// The request line `GET /callback?code=...&state=... HTTP/1.1` is
    /// resolved against the URL the environment was created with.  The
    /// browser receives a short plain-text confirmation.  Connections that
    /// close without sending a request line (browser pre-connects) are
    /// dropped and the next one is awaited.
    pub async fn await_callback(&self, listener: TcpListener) -> Result<Url> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let (read_half, mut write_half) = stream.into_split();

            let target = match read_request_target(read_half).await {
                Ok(Some(target)) => target,
                Ok(None) => {
                    tracing::debug!(%peer, "connection closed without a request, waiting");
                    continue;
                }
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "unreadable connection, waiting");
                    continue;
                }
            };
            tracing::debug!(%peer, "accepted redirect callback");

            // A browser that already went away is not our problem.
            let _ = write_half.write_all(CALLBACK_RESPONSE.as_bytes()).await;
            let _ = write_half.shutdown().await;

            let url = self.callback_base.join(&target).map_err(|e| {
                SmartError::Config(format!("malformed callback request target '{target}': {e}"))
            })?;

            self.set_url(url.clone());
            return Ok(url);
        }
    }

    fn try_open_browser(&self, url: &str) {
        #[cfg(target_os = "macos")]
        {
            let _ = std::process::Command::new("open").arg(url).spawn();
        }
        #[cfg(target_os = "linux")]
        {
            let _ = std::process::Command::new("xdg-open").arg(url).spawn();
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            let _ = url;
        }
    }
}

/// Reads one HTTP request head and returns its target.
///
/// `None` when the peer sent no request line.
async fn read_request_target(read_half: OwnedReadHalf) -> Result<Option<String>> {
    let mut lines = BufReader::new(read_half).lines();
    let mut request_line = String::new();

    while let Some(line) = lines.next_line().await? {
        // Headers end at the first empty line.
        if line.is_empty() {
            break;
        }
        if request_line.is_empty() {
            request_line = line;
        }
    }

    Ok(request_line.split_whitespace().nth(1).map(str::to_string))
}

#[async_trait]
impl Environment for BrowserEnvironment {
    fn url(&self) -> Url {
        self.url.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }

    async fn redirect(&self, url: &str) -> Result<()> {
        let target = Url::parse(url)
            .map_err(|e| SmartError::Config(format!("invalid redirect URL '{url}': {e}")))?;

        self.navigations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());

        if self.open_browser {
            eprintln!("Open the following URL in your browser to continue:\n{url}");
            self.try_open_browser(url);
        }

        self.set_url(target);
        Ok(())
    }

    fn is_interactive(&self) -> bool {
        true
    }

    fn supports_history_replace(&self) -> bool {
        self.history_replace
    }

    fn replace_url(&self, url: &Url) -> Result<()> {
        self.set_url(url.clone());
        Ok(())
    }
}
