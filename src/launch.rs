//! Launch state machine
//!
//! A launch moves through the following states:
//!
//! ```text
//! Uninitialized -> Authorizing -> RedirectedPendingCode -> Exchanging -> Authorized
//!                       |                                        ^
//!                       +--> OpenServerBypass                    |
//!                                                 Revived <------+ (persisted)
//! ```
//!
//! [`LaunchFlow::authorize`] persists a fresh [`SessionRecord`] and navigates
//! away, either to the authorization server or straight back to the
//! redirect URI for open servers.  [`LaunchFlow::complete_auth`] runs on the
//! redirect URI: it finds the record again through the `state` parameter (or
//! the well-known pointer), exchanges the code when one is present, and
//! produces a [`Client`].  [`LaunchFlow::init`] chooses between the two and
//! session revival.
//!
//! Every storage write happens before the navigation that follows it.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::client::Client;
use crate::config::AuthSettings;
use crate::discovery::resolve_security_endpoints;
use crate::env::{has_query_param, query_param, resolve_relative, Environment};
use crate::error::{Result, SmartError};
use crate::revival;
use crate::session::{self, SessionKey, SessionRecord, TokenResponse};
use crate::token::exchange_code;

// ---------------------------------------------------------------------------
// LaunchState
// ---------------------------------------------------------------------------

/// Where a launch currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchState {
    /// Nothing has happened yet.
    Uninitialized,
    /// Building and persisting the session record.
    Authorizing,
    /// Navigated to the authorization server, waiting for the code.
    RedirectedPendingCode,
    /// Trading the authorization code for a token.
    Exchanging,
    /// The session holds an access token.
    Authorized,
    /// No authorization step: `fhirServiceUrl` bypass or an open server.
    OpenServerBypass,
    /// Restored from a persisted record without any network activity.
    Revived,
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LaunchState::Uninitialized => "uninitialized",
            LaunchState::Authorizing => "authorizing",
            LaunchState::RedirectedPendingCode => "redirected_pending_code",
            LaunchState::Exchanging => "exchanging",
            LaunchState::Authorized => "authorized",
            LaunchState::OpenServerBypass => "open_server_bypass",
            LaunchState::Revived => "revived",
        };
        f.write_str(name)
    }
}

fn transition(from: LaunchState, to: LaunchState) {
    tracing::debug!(%from, %to, "launch state transition");
}

// ---------------------------------------------------------------------------
// AuthorizeParams
// ---------------------------------------------------------------------------

/// Options accepted by [`LaunchFlow::authorize`].
///
/// Both `clientId`/`client_id` and `redirectUri`/`redirect_uri` spellings
/// are accepted when deserializing.
///
/// # Examples
///
/// ```
/// use smart_launch::launch::AuthorizeParams;
///
/// let params: AuthorizeParams = serde_json::from_value(serde_json::json!({
///     "iss": "https://launch.smarthealthit.org/v/r4/fhir",
///     "client_id": "my_web_app",
///     "scope": "patient/*.read",
/// })).unwrap();
///
/// assert_eq!(params.client_id.as_deref(), Some("my_web_app"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeParams {
    /// FHIR server that requires authorization.
    #[serde(default)]
    pub iss: Option<String>,

    /// FHIR server to use without authorization.
    #[serde(default)]
    pub fhir_service_url: Option<String>,

    /// EHR launch token.
    #[serde(default)]
    pub launch: Option<String>,

    /// Where the authorization server sends the user back to.
    #[serde(default, alias = "redirect_uri")]
    pub redirect_uri: Option<String>,

    /// Registered client identifier.
    #[serde(default, alias = "client_id")]
    pub client_id: Option<String>,

    /// Requested scopes, space separated.
    #[serde(default)]
    pub scope: Option<String>,

    /// Secret of a confidential client.
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Fixed patient in context.
    #[serde(default)]
    pub patient_id: Option<String>,

    /// Fixed encounter in context.
    #[serde(default)]
    pub encounter_id: Option<String>,

    /// Values pre-seeded into the token response.
    #[serde(default)]
    pub fake_token_response: Option<Map<String, Value>>,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

/// Appends the `launch` scope unless it is already requested.
///
/// # Examples
///
/// ```
/// use smart_launch::launch::ensure_launch_scope;
///
/// assert_eq!(ensure_launch_scope("openid"), "openid launch");
/// assert_eq!(ensure_launch_scope("launch openid"), "launch openid");
/// assert_eq!(ensure_launch_scope(""), "launch");
/// ```
pub fn ensure_launch_scope(scope: &str) -> String {
    if scope.split_whitespace().any(|s| s == "launch") {
        return scope.to_string();
    }
    let trimmed = scope.trim();
    if trimmed.is_empty() {
        "launch".to_string()
    } else {
        format!("{trimmed} launch")
    }
}

// ---------------------------------------------------------------------------
// InitOutcome
// ---------------------------------------------------------------------------

/// Result of [`LaunchFlow::init`].
#[derive(Debug)]
pub enum InitOutcome {
    /// A usable client, from a completed or revived launch.
    Ready(Client),

    /// The environment was sent to `url`.  The launch continues on the next
    /// load of the redirect URI; nothing more happens in this run.
    PendingRedirect {
        /// Where the environment was navigated to.
        url: String,
    },
}

impl InitOutcome {
    /// The client, if the launch finished in this run.
    pub fn into_client(self) -> Option<Client> {
        match self {
            InitOutcome::Ready(client) => Some(client),
            InitOutcome::PendingRedirect { .. } => None,
        }
    }

    /// Whether the environment is waiting on a navigation.
    pub fn is_pending(&self) -> bool {
        matches!(self, InitOutcome::PendingRedirect { .. })
    }
}

// ---------------------------------------------------------------------------
// LaunchFlow
// ---------------------------------------------------------------------------

/// Drives `authorize`, `complete_auth` and `init` against an [`Environment`].
#[derive(Debug, Clone)]
pub struct LaunchFlow {
    http: reqwest::Client,
    settings: AuthSettings,
}

impl LaunchFlow {
    /// Creates a flow issuing requests through `http`.
    pub fn new(http: reqwest::Client, settings: AuthSettings) -> Self {
        Self { http, settings }
    }

    /// The settings applied when completing authorization.
    pub fn settings(&self) -> AuthSettings {
        self.settings
    }

    /// Starts a launch and navigates `env` to the resulting URL.
    ///
    /// Returns the URL that was navigated to.
    ///
    /// # Errors
    ///
    /// Returns [`SmartError::Config`] when neither `iss` nor
    /// `fhirServiceUrl` names a server, and storage errors from persisting
    /// the session record.
    pub async fn authorize(&self, env: &dyn Environment, params: &AuthorizeParams) -> Result<String> {
        let url = self.authorize_url(env, params).await?;
        env.redirect(&url).await?;
        Ok(url)
    }

    /// Starts a launch without navigating.
    ///
    /// Performs every effect of [`authorize`](Self::authorize) (the pointer
    /// is cleared, the record is persisted) and returns the URL that
    /// `authorize` would navigate to.
    pub async fn authorize_url(&self, env: &dyn Environment, params: &AuthorizeParams) -> Result<String> {
        transition(LaunchState::Uninitialized, LaunchState::Authorizing);
        let current = env.url();

        let iss = query_param(&current, "iss").or_else(|| non_empty(params.iss.as_ref()));
        let fhir_service_url = query_param(&current, "fhirServiceUrl")
            .or_else(|| non_empty(params.fhir_service_url.as_ref()));
        let launch = query_param(&current, "launch").or_else(|| non_empty(params.launch.as_ref()));

        let redirect_uri = match non_empty(params.redirect_uri.as_ref()) {
            Some(uri) => env.relative(&uri)?,
            None => env.relative(".")?,
        };

        let server_url = iss
            .clone()
            .or_else(|| fhir_service_url.clone())
            .ok_or_else(|| {
                SmartError::Config(
                    "No server url found. It must be specified as `iss` or as `fhirServiceUrl` parameter"
                        .into(),
                )
            })?;

        if iss.is_some() {
            tracing::debug!(
                server_url = %server_url,
                "making {} launch",
                if launch.is_some() { "EHR" } else { "standalone" }
            );
        }

        let mut scope = params.scope.clone().unwrap_or_default();
        if launch.is_some() {
            scope = ensure_launch_scope(&scope);
        }

        let storage = env.storage();
        session::clear_pointer(storage.as_ref()).await?;

        let key = SessionKey::generate();
        let mut record = SessionRecord::new(key.clone(), server_url.clone())?;
        record.client_id = non_empty(params.client_id.as_ref());
        record.client_secret = non_empty(params.client_secret.as_ref());
        record.scope = scope.clone();
        record.redirect_uri = redirect_uri.clone();
        apply_development_overrides(&mut record.token_response, params);

        let state_redirect = with_query(&redirect_uri, &[("state", key.as_str())])?;

        if fhir_service_url.is_some() && iss.is_none() {
            tracing::debug!(server_url = %server_url, "making fake launch without discovery");
            record.save(storage.as_ref()).await?;
            transition(LaunchState::Authorizing, LaunchState::OpenServerBypass);
            return Ok(state_redirect);
        }

        let endpoints = resolve_security_endpoints(&self.http, &server_url).await;
        record.apply_endpoints(endpoints);
        record.authorize_uri = resolve_endpoint(&server_url, &record.authorize_uri)?;
        record.token_uri = resolve_endpoint(&server_url, &record.token_uri)?;
        record.registration_uri = resolve_endpoint(&server_url, &record.registration_uri)?;
        record.save(storage.as_ref()).await?;

        if record.is_open_server() {
            tracing::debug!(server_url = %server_url, "no authorize endpoint, server is open");
            transition(LaunchState::Authorizing, LaunchState::OpenServerBypass);
            return Ok(state_redirect);
        }

        let client_id = record.client_id.clone().unwrap_or_default();
        let mut query = vec![
            ("response_type", "code"),
            ("client_id", client_id.as_str()),
            ("scope", scope.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("aud", server_url.as_str()),
            ("state", key.as_str()),
        ];
        if let Some(launch) = launch.as_deref() {
            query.push(("launch", launch));
        }

        let url = with_query(&record.authorize_uri, &query)?;
        transition(LaunchState::Authorizing, LaunchState::RedirectedPendingCode);
        Ok(url)
    }

    /// Completes a launch on the redirect URI.
    ///
    /// # Errors
    ///
    /// - [`SmartError::AuthorizationDenied`] when the URL carries `error` or
    ///   `error_description`; nothing is read from storage in that case.
    /// - [`SmartError::NoStateParameter`] when neither the URL nor the
    ///   well-known pointer yields a session key.
    /// - [`SmartError::SessionNotFound`] when no record is stored under the
    ///   key.
    /// - [`SmartError::MissingStateField`] or [`SmartError::TokenExchange`]
    ///   from the code exchange.
    pub async fn complete_auth(&self, env: Arc<dyn Environment>) -> Result<Client> {
        let url = env.url();
        let code = query_param(&url, "code");
        let auth_error = query_param(&url, "error");
        let auth_error_description = query_param(&url, "error_description");

        if auth_error.is_some() || auth_error_description.is_some() {
            let message = [auth_error, auth_error_description]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(": ");
            return Err(SmartError::AuthorizationDenied(message).into());
        }

        let storage = env.storage();
        let key = match query_param(&url, "state") {
            Some(state) => SessionKey::from(state),
            None => session::read_pointer(storage.as_ref())
                .await?
                .ok_or(SmartError::NoStateParameter)?,
        };
        tracing::debug!(key = %key, has_code = code.is_some(), "completing authorization");

        let record = SessionRecord::load(storage.as_ref(), &key).await?;

        if env.is_interactive() {
            self.clean_url(env.as_ref(), &url, code.is_some()).await?;
        }

        let mut record = record.ok_or(SmartError::SessionNotFound)?;

        let state = match code {
            Some(code) => {
                transition(LaunchState::RedirectedPendingCode, LaunchState::Exchanging);
                let tokens = exchange_code(&self.http, &code, &record).await?;
                record.set_token_response(tokens);
                record.save(storage.as_ref()).await?;
                if self.settings.full_session_storage_support {
                    session::write_pointer(storage.as_ref(), &key).await?;
                }
                transition(LaunchState::Exchanging, LaunchState::Authorized);
                tracing::info!(server_url = %record.server_url, "authorization successful");
                LaunchState::Authorized
            }
            None if record.is_authorized() => {
                tracing::debug!("already authorized");
                LaunchState::Authorized
            }
            None => {
                tracing::debug!("no authorization needed");
                LaunchState::OpenServerBypass
            }
        };

        Ok(Client::new(env, record, state))
    }

    /// Runs [`complete_auth`](Self::complete_auth) and hands the client to
    /// `on_success`.
    ///
    /// Errors are returned unchanged, so the caller's error handling is a
    /// plain `match` or `?` on the result.
    pub async fn ready<T, F>(&self, env: Arc<dyn Environment>, on_success: F) -> Result<T>
    where
        F: FnOnce(Client) -> T,
    {
        let client = self.complete_auth(env).await?;
        Ok(on_success(client))
    }

    /// Completes, revives or starts a launch, whichever the current URL and
    /// storage call for.
    ///
    /// - `code` and `state` in the URL: [`complete_auth`](Self::complete_auth).
    /// - A stored record for the resolved key: revived without network
    ///   access.
    /// - Otherwise [`authorize`](Self::authorize), reported as
    ///   [`InitOutcome::PendingRedirect`].
    ///
    /// # Errors
    ///
    /// Errors from whichever branch runs are returned as-is.
    pub async fn init(&self, env: Arc<dyn Environment>, params: &AuthorizeParams) -> Result<InitOutcome> {
        let url = env.url();
        if query_param(&url, "code").is_some() && query_param(&url, "state").is_some() {
            return Ok(InitOutcome::Ready(self.complete_auth(env).await?));
        }

        if let Some(client) = revival::revive(env.clone(), &self.settings).await? {
            return Ok(InitOutcome::Ready(client));
        }

        let url = self.authorize(env.as_ref(), params).await?;
        Ok(InitOutcome::PendingRedirect { url })
    }

    async fn clean_url(&self, env: &dyn Environment, url: &Url, has_code: bool) -> Result<()> {
        let has_state = has_query_param(url, "state");
        if !self.settings.replace_browser_history || !(has_code || has_state) {
            return Ok(());
        }

        let strip_state = has_state && self.settings.full_session_storage_support;
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !(has_code && k == "code"))
            .filter(|(k, _)| !(strip_state && k == "state"))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let mut cleaned = url.clone();
        if kept.is_empty() {
            cleaned.set_query(None);
        } else {
            cleaned.query_pairs_mut().clear().extend_pairs(kept);
        }

        if env.supports_history_replace() {
            tracing::debug!(url = %cleaned, "replacing current url");
            env.replace_url(&cleaned)
        } else {
            tracing::debug!(url = %cleaned, "history replacement unsupported, navigating");
            env.redirect(cleaned.as_str()).await
        }
    }
}

fn apply_development_overrides(tokens: &mut TokenResponse, params: &AuthorizeParams) {
    if let Some(fake) = &params.fake_token_response {
        tokens.merge(TokenResponse::from(fake.clone()));
    }
    if let Some(patient) = non_empty(params.patient_id.as_ref()) {
        tokens.insert("patient", Value::String(patient));
    }
    if let Some(encounter) = non_empty(params.encounter_id.as_ref()) {
        tokens.insert("encounter", Value::String(encounter));
    }
}

/// Makes a discovered endpoint absolute; relative ones hang off the FHIR base.
fn resolve_endpoint(server_url: &str, uri: &str) -> Result<String> {
    if uri.is_empty() || Url::parse(uri).is_ok() {
        return Ok(uri.to_string());
    }
    let base = format!("{}/", server_url.trim_end_matches('/'));
    let base = Url::parse(&base)
        .map_err(|e| SmartError::Config(format!("invalid server url '{server_url}': {e}")))?;
    resolve_relative(&base, uri)
}

fn with_query(base: &str, pairs: &[(&str, &str)]) -> Result<String> {
    let mut url = Url::parse(base)
        .map_err(|e| SmartError::Config(format!("invalid url '{base}': {e}")))?;
    url.query_pairs_mut().extend_pairs(pairs);
    Ok(url.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
