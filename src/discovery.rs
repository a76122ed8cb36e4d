//! SMART authorization endpoint discovery
//!
//! Locates a FHIR server's OAuth endpoints before an authorization request
//! is built.
//!
//! # Discovery sequence
//!
//! 1. [`fetch_well_known_json`] retrieves
//!    `<base>/.well-known/smart-configuration`.  When it names both an
//!    authorization and a token endpoint, those are used as-is.
//! 2. Otherwise [`fetch_conformance_statement`] retrieves `<base>/metadata`
//!    and the legacy `oauth-uris` extension under
//!    `rest[0].security.extension` is read instead.
//! 3. If neither document yields anything, the server is treated as open:
//!    [`resolve_security_endpoints`] returns empty endpoints rather than an
//!    error.
//!
//! # References
//!
//! - SMART App Launch conformance
//!   <https://hl7.org/fhir/smart-app-launch/conformance.html>

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SmartError};
use crate::http::fetch_json;

/// Extension URL carrying OAuth endpoints in a capability statement.
pub const OAUTH_URIS_EXTENSION: &str =
    "http://fhir-registry.smarthealthit.org/StructureDefinition/oauth-uris";

// ---------------------------------------------------------------------------
// SecurityEndpoints
// ---------------------------------------------------------------------------

/// OAuth endpoints of a FHIR server.
///
/// Every field may be empty.  An empty `authorize_uri` means the server does
/// not require authorization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEndpoints {
    /// Authorization endpoint.
    pub authorize_uri: String,

    /// Token endpoint.
    pub token_uri: String,

    /// Dynamic client registration endpoint.
    pub registration_uri: String,
}

impl SecurityEndpoints {
    /// Whether no authorization step is needed.
    pub fn is_open_server(&self) -> bool {
        self.authorize_uri.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SmartConfiguration
// ---------------------------------------------------------------------------

/// The `.well-known/smart-configuration` document.
///
/// Only the endpoint fields are needed for the launch; the rest is kept for
/// callers that want to inspect server capabilities.  Fields are read
/// leniently: a `null` or oddly typed member is ignored instead of making
/// the whole document unusable.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use smart_launch::discovery::SmartConfiguration;
///
/// let config = SmartConfiguration::from_value(&json!({
///     "authorization_endpoint": "https://ehr.example.com/auth/authorize",
///     "token_endpoint": "https://ehr.example.com/auth/token",
///     "capabilities": ["launch-ehr", "client-public", 7]
/// }));
/// assert_eq!(config.capabilities.len(), 2);
/// assert!(config.registration_endpoint.is_none());
/// ```
#[derive(Debug, Clone, Default, Serialize)]
pub struct SmartConfiguration {
    /// Issuer identifier, when OpenID Connect is offered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Authorization endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    /// Token endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// Dynamic client registration endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// Scopes the server supports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// SMART capabilities such as `launch-ehr` or `client-confidential-symmetric`.
    pub capabilities: Vec<String>,

    /// Any fields not modelled above.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

const MODELLED_FIELDS: [&str; 6] = [
    "issuer",
    "authorization_endpoint",
    "token_endpoint",
    "registration_endpoint",
    "scopes_supported",
    "capabilities",
];

fn string_field(doc: &Value, name: &str) -> Option<String> {
    doc.get(name).and_then(Value::as_str).map(str::to_string)
}

fn string_list(doc: &Value, name: &str) -> Option<Vec<String>> {
    doc.get(name).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

impl SmartConfiguration {
    /// Reads a configuration out of an arbitrary JSON document.
    ///
    /// Non-objects yield an empty configuration.
    pub fn from_value(doc: &Value) -> Self {
        let extra = doc
            .as_object()
            .map(|map| {
                map.iter()
                    .filter(|(k, _)| !MODELLED_FIELDS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            issuer: string_field(doc, "issuer"),
            authorization_endpoint: string_field(doc, "authorization_endpoint"),
            token_endpoint: string_field(doc, "token_endpoint"),
            registration_endpoint: string_field(doc, "registration_endpoint"),
            scopes_supported: string_list(doc, "scopes_supported"),
            capabilities: string_list(doc, "capabilities").unwrap_or_default(),
            extra,
        }
    }

    /// Extracts the endpoints, requiring both authorization and token
    /// endpoints to be present and non-empty.
    pub fn endpoints(&self) -> Result<SecurityEndpoints> {
        let authorize = non_empty(&self.authorization_endpoint);
        let token = non_empty(&self.token_endpoint);

        match (authorize, token) {
            (Some(authorize_uri), Some(token_uri)) => Ok(SecurityEndpoints {
                authorize_uri,
                token_uri,
                registration_uri: non_empty(&self.registration_endpoint).unwrap_or_default(),
            }),
            _ => Err(SmartError::Discovery(
                "smart-configuration lacks authorization_endpoint or token_endpoint".into(),
            )
            .into()),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

/// Normalizes `base_url` to end with exactly one `/` and appends `path`.
fn discovery_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Fetches the well-known SMART configuration of `base_url`.
///
/// # Errors
///
/// Returns [`SmartError::Discovery`] if the request fails or the body is not
/// a JSON object.
pub async fn fetch_well_known_json(
    http: &reqwest::Client,
    base_url: &str,
) -> Result<SmartConfiguration> {
    let url = discovery_url(base_url, ".well-known/smart-configuration");
    let value = fetch_json(http.get(&url)).await.map_err(|e| {
        SmartError::Discovery(format!("Failed to fetch the well-known json \"{url}\". {e}"))
    })?;

    if !value.is_object() {
        return Err(SmartError::Discovery(format!(
            "Invalid well-known json \"{url}\". Expected a JSON object"
        ))
        .into());
    }
    Ok(SmartConfiguration::from_value(&value))
}

/// Fetches the capability statement (`/metadata`) of `base_url`.
///
/// # Errors
///
/// Returns [`SmartError::Discovery`] if the request fails.
pub async fn fetch_conformance_statement(http: &reqwest::Client, base_url: &str) -> Result<Value> {
    let url = discovery_url(base_url, "metadata");
    fetch_json(http.get(&url)).await.map_err(|e| {
        SmartError::Discovery(format!(
            "Failed to fetch the conformance statement from \"{url}\". {e}"
        ))
        .into()
    })
}

/// Reads the `oauth-uris` extension out of a capability statement.
///
/// The first extension with the `oauth-uris` URL wins.  Within it the
/// `register`, `authorize` and `token` sub-extensions map to the three
/// endpoint fields; anything missing stays empty.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use smart_launch::discovery::{endpoints_from_capability_statement, OAUTH_URIS_EXTENSION};
///
/// let metadata = json!({
///     "rest": [{
///         "security": {
///             "extension": [{
///                 "url": OAUTH_URIS_EXTENSION,
///                 "extension": [
///                     {"url": "authorize", "valueUri": "https://auth/authorize"},
///                     {"url": "token", "valueUri": "https://auth/token"}
///                 ]
///             }]
///         }
///     }]
/// });
///
/// let endpoints = endpoints_from_capability_statement(&metadata);
/// assert_eq!(endpoints.authorize_uri, "https://auth/authorize");
/// assert_eq!(endpoints.registration_uri, "");
/// ```
pub fn endpoints_from_capability_statement(metadata: &Value) -> SecurityEndpoints {
    let mut out = SecurityEndpoints::default();

    let oauth_uris = metadata
        .pointer("/rest/0/security/extension")
        .and_then(Value::as_array)
        .and_then(|list| {
            list.iter()
                .find(|ext| ext.get("url").and_then(Value::as_str) == Some(OAUTH_URIS_EXTENSION))
        })
        .and_then(|ext| ext.get("extension"))
        .and_then(Value::as_array);

    for ext in oauth_uris.into_iter().flatten() {
        let value = ext
            .get("valueUri")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match ext.get("url").and_then(Value::as_str) {
            Some("register") => out.registration_uri = value,
            Some("authorize") => out.authorize_uri = value,
            Some("token") => out.token_uri = value,
            _ => {}
        }
    }

    out
}

/// Resolves the OAuth endpoints of the FHIR server at `base_url`.
///
/// Never fails: when neither the well-known document nor the capability
/// statement yields endpoints, the empty result marks an open server.
///
/// # Examples
///
/// ```no_run
/// use smart_launch::discovery::resolve_security_endpoints;
///
/// # async fn example() {
/// let http = reqwest::Client::new();
/// let endpoints = resolve_security_endpoints(&http, "https://launch.smarthealthit.org/v/r4/fhir").await;
/// if endpoints.is_open_server() {
///     println!("no authorization required");
/// }
/// # }
/// ```
pub async fn resolve_security_endpoints(http: &reqwest::Client, base_url: &str) -> SecurityEndpoints {
    match fetch_well_known_json(http, base_url)
        .await
        .and_then(|config| config.endpoints())
    {
        Ok(endpoints) => {
            tracing::debug!(base_url, "endpoints resolved from smart-configuration");
            return endpoints;
        }
        Err(e) => {
            tracing::warn!(base_url, error = %e, "smart-configuration unusable, trying metadata");
        }
    }

    match fetch_conformance_statement(http, base_url).await {
        Ok(metadata) => {
            let endpoints = endpoints_from_capability_statement(&metadata);
            tracing::debug!(
                base_url,
                open_server = endpoints.is_open_server(),
                "endpoints resolved from capability statement"
            );
            endpoints
        }
        Err(e) => {
            tracing::warn!(base_url, error = %e, "metadata unavailable, treating server as open");
            SecurityEndpoints::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
