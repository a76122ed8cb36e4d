/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `discover` : Resolve a server's authorization endpoints
- `authorize`: Start a launch, optionally finishing it through the browser
- `complete` : Finish a launch from a callback URL
- `init`     : Complete, revive or start a launch
- `session`  : Inspect stored sessions

Results are printed to stdout as JSON; logs go to stderr.
*/

use std::sync::Arc;

use serde_json::{json, Value};
use url::Url;

use crate::client::Client;
use crate::config::Config;
use crate::env::{BrowserEnvironment, Environment, HeadlessEnvironment, Storage};
use crate::error::{Result, SmartError};
use crate::launch::LaunchFlow;

fn print_json(value: &Value) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(SmartError::Serialization)?;
    println!("{}", json);
    Ok(())
}

fn parse_url(url: &str) -> Result<Url> {
    Ok(Url::parse(url).map_err(|e| SmartError::Config(format!("invalid url '{}': {}", url, e)))?)
}

fn launch_flow(config: &Config) -> Result<LaunchFlow> {
    Ok(LaunchFlow::new(config.http_client()?, config.settings))
}

fn headless(url: Url, storage: Arc<dyn Storage>) -> Arc<dyn Environment> {
    Arc::new(HeadlessEnvironment::new(url, storage))
}

/// Printable summary of a client context.  Tokens are left out.
pub fn client_summary(client: &Client) -> Value {
    json!({
        "state": client.state(),
        "key": client.session().key,
        "serverUrl": client.server_url(),
        "authorized": client.session().is_authorized(),
        "expired": client.is_expired(),
        "scope": client.session().scope,
        "patient": client.patient_id(),
        "encounter": client.encounter_id(),
    })
}

// Discovery command handler
pub mod discover {
    use super::*;
    use crate::discovery::resolve_security_endpoints;

    /// Resolve and print the security endpoints of `server_url`
    pub async fn run_discover(config: &Config, server_url: &str) -> Result<()> {
        let http = config.http_client()?;
        let endpoints = resolve_security_endpoints(&http, server_url).await;
        tracing::info!(
            server_url,
            open_server = endpoints.is_open_server(),
            "Discovery finished"
        );
        let mut value = serde_json::to_value(&endpoints).map_err(SmartError::Serialization)?;
        value["openServer"] = Value::Bool(endpoints.is_open_server());
        print_json(&value)
    }
}

// Authorize command handler
pub mod authorize {
    use super::*;

    /// Server selection passed on the command line
    #[derive(Debug, Clone, Default)]
    pub struct AuthorizeArgs {
        pub iss: Option<String>,
        pub fhir_service_url: Option<String>,
        pub launch: Option<String>,
        pub print_only: bool,
    }

    /// Start a launch
    ///
    /// With `print_only` the redirect URL is printed and the launch stops
    /// there; the session is still persisted so `complete` can finish it.
    /// Otherwise the browser is opened and the loopback redirect URI waits
    /// for the authorization server's callback.
    pub async fn run_authorize(config: &Config, args: AuthorizeArgs) -> Result<()> {
        let mut params = config.authorize_params();
        if args.iss.is_some() || args.fhir_service_url.is_some() {
            params.iss = args.iss;
            params.fhir_service_url = args.fhir_service_url;
        }
        if args.launch.is_some() {
            params.launch = args.launch;
        }

        let redirect_uri = parse_url(&config.client.redirect_uri)?;
        let storage = config.open_storage()?;
        let flow = launch_flow(config)?;

        if args.print_only {
            let env = headless(redirect_uri, storage);
            let url = flow.authorize_url(env.as_ref(), &params).await?;
            println!("{}", url);
            return Ok(());
        }

        let listener = BrowserEnvironment::bind_callback(&redirect_uri).await?;
        let env = Arc::new(BrowserEnvironment::new(redirect_uri, storage));
        let url = flow.authorize(env.as_ref(), &params).await?;
        tracing::info!("Waiting for redirect callback");
        tracing::debug!(url = %url, "navigated");

        env.await_callback(listener).await?;
        let client = flow.complete_auth(env).await?;
        tracing::info!(state = %client.state(), "Launch complete");
        print_json(&client_summary(&client))
    }
}

// Complete command handler
pub mod complete {
    use super::*;

    /// Finish a launch from the URL the browser was redirected to
    pub async fn run_complete(config: &Config, callback_url: &str) -> Result<()> {
        let env = headless(parse_url(callback_url)?, config.open_storage()?);
        let client = launch_flow(config)?.complete_auth(env).await?;
        print_json(&client_summary(&client))
    }
}

// Init command handler
pub mod init {
    use super::*;
    use crate::launch::InitOutcome;

    /// Complete, revive or start a launch for `current_url`
    ///
    /// Without a URL the configured redirect URI is used as the current
    /// page.
    pub async fn run_init(config: &Config, current_url: Option<String>) -> Result<()> {
        let url = match current_url {
            Some(url) => parse_url(&url)?,
            None => parse_url(&config.client.redirect_uri)?,
        };
        let env = headless(url, config.open_storage()?);
        let params = config.authorize_params();

        match launch_flow(config)?.init(env, &params).await? {
            InitOutcome::Ready(client) => print_json(&client_summary(&client)),
            InitOutcome::PendingRedirect { url } => print_json(&json!({
                "state": "pending_redirect",
                "redirectUrl": url,
            })),
        }
    }
}

// Session command handler
pub mod session {
    use super::*;
    use crate::session::{read_pointer, SessionKey, SessionRecord};

    /// Print the stored session for `key`, or for the well-known pointer
    ///
    /// Secrets are masked.
    pub async fn run_session(config: &Config, key: Option<String>) -> Result<()> {
        let storage = config.open_storage()?;
        let key = match key {
            Some(key) => SessionKey::from(key),
            None => read_pointer(storage.as_ref())
                .await?
                .ok_or(SmartError::NoStateParameter)?,
        };

        let record = SessionRecord::load(storage.as_ref(), &key)
            .await?
            .ok_or(SmartError::SessionNotFound)?;
        let value = serde_json::to_value(record.redacted()).map_err(SmartError::Serialization)?;
        print_json(&value)
    }
}
