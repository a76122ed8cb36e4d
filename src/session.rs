//! Session records and the well-known pointer
//!
//! A [`SessionRecord`] is everything one authorization attempt needs to
//! survive the redirect to the authorization server and back.  It is stored
//! under its [`SessionKey`], which doubles as the OAuth `state` parameter.
//! Once a record is fully authorized, the key is also written under
//! [`SMART_KEY`] so a later page load can find it without any URL
//! parameters.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::discovery::SecurityEndpoints;
use crate::env::Storage;
use crate::error::{Result, SmartError};

/// Storage key of the well-known pointer to the last authorized session.
pub const SMART_KEY: &str = "SMART_KEY";

/// Length of freshly generated session keys.
pub const SESSION_KEY_LENGTH: usize = 16;

// ---------------------------------------------------------------------------
// SessionKey
// ---------------------------------------------------------------------------

/// Opaque random identifier of one authorization attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Generates a new random alphanumeric key of [`SESSION_KEY_LENGTH`]
    /// characters.
    ///
    /// # Examples
    ///
    /// ```
    /// use smart_launch::session::SessionKey;
    ///
    /// let a = SessionKey::generate();
    /// let b = SessionKey::generate();
    /// assert_eq!(a.as_str().len(), 16);
    /// assert_ne!(a, b);
    /// ```
    pub fn generate() -> Self {
        let key: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_KEY_LENGTH)
            .map(char::from)
            .collect();
        Self(key)
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// TokenResponse
// ---------------------------------------------------------------------------

/// The token endpoint response, kept as an open JSON object.
///
/// Besides `access_token` it carries whatever launch context the server
/// returned (`patient`, `encounter`, `id_token`, ...).  It may also be
/// pre-seeded by development overrides before any exchange happens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenResponse(Map<String, Value>);

impl TokenResponse {
    /// An empty response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a response from a JSON value; non-objects yield an empty map.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    /// The non-empty `access_token`, if present.
    pub fn access_token(&self) -> Option<&str> {
        self.str_field("access_token")
    }

    /// The `patient` launch context, if present.
    pub fn patient(&self) -> Option<&str> {
        self.str_field("patient")
    }

    /// The `encounter` launch context, if present.
    pub fn encounter(&self) -> Option<&str> {
        self.str_field("encounter")
    }

    /// Lifetime of the access token in seconds, if the server sent one.
    pub fn expires_in(&self) -> Option<i64> {
        self.0.get("expires_in").and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
    }

    /// Returns the raw field `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Sets field `name`, replacing any existing value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    /// Copies every field of `other` over this response.
    pub fn merge(&mut self, other: TokenResponse) {
        self.0.extend(other.0);
    }

    /// Whether no fields are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    fn str_field(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

impl From<Map<String, Value>> for TokenResponse {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ---------------------------------------------------------------------------
// SessionRecord
// ---------------------------------------------------------------------------

/// Persisted state of one authorization attempt.
///
/// Field names are serialized in camelCase so records written by other
/// SMART client implementations can be read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Storage key and OAuth `state` value.
    pub key: SessionKey,

    /// OAuth client identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Client secret of a confidential client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Space-separated scopes requested at authorize time.
    #[serde(default)]
    pub scope: String,

    /// Absolute redirect URI registered for the client.
    #[serde(default)]
    pub redirect_uri: String,

    /// FHIR server base URL (the `aud` of the authorization request).
    pub server_url: String,

    /// Authorization endpoint; empty for open servers.
    #[serde(default)]
    pub authorize_uri: String,

    /// Token endpoint.
    #[serde(default)]
    pub token_uri: String,

    /// Dynamic registration endpoint.
    #[serde(default)]
    pub registration_uri: String,

    /// Token response, pre-seeded or obtained from the token endpoint.
    #[serde(default)]
    pub token_response: TokenResponse,

    /// When a token endpoint response was last stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Creates a record for `server_url` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SmartError::Config`] when `server_url` is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use smart_launch::session::{SessionKey, SessionRecord};
    ///
    /// let record = SessionRecord::new(SessionKey::generate(), "https://fhir.example.com").unwrap();
    /// assert!(record.token_response.is_empty());
    /// assert!(SessionRecord::new(SessionKey::generate(), "").is_err());
    /// ```
    pub fn new(key: SessionKey, server_url: impl Into<String>) -> Result<Self> {
        let server_url = server_url.into();
        if server_url.is_empty() {
            return Err(SmartError::Config("session record requires a server url".into()).into());
        }
        Ok(Self {
            key,
            client_id: None,
            client_secret: None,
            scope: String::new(),
            redirect_uri: String::new(),
            server_url,
            authorize_uri: String::new(),
            token_uri: String::new(),
            registration_uri: String::new(),
            token_response: TokenResponse::new(),
            authorized_at: None,
        })
    }

    /// Copies discovered endpoints into the record.
    pub fn apply_endpoints(&mut self, endpoints: SecurityEndpoints) {
        self.authorize_uri = endpoints.authorize_uri;
        self.token_uri = endpoints.token_uri;
        self.registration_uri = endpoints.registration_uri;
    }

    /// Replaces the token response with one from the token endpoint and
    /// stamps `authorized_at`.
    ///
    /// Pre-seeded development values do not survive a real exchange.
    pub fn set_token_response(&mut self, response: TokenResponse) {
        self.token_response = response;
        self.authorized_at = Some(Utc::now());
    }

    /// Whether the record holds an access token.
    pub fn is_authorized(&self) -> bool {
        self.token_response.access_token().is_some()
    }

    /// Whether discovery found no authorization endpoint.
    pub fn is_open_server(&self) -> bool {
        self.authorize_uri.is_empty()
    }

    /// Copy of the record safe to print: secrets are masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.client_secret.is_some() {
            copy.client_secret = Some("***".to_string());
        }
        if copy.token_response.get("access_token").is_some() {
            copy.token_response
                .insert("access_token", Value::String("***".to_string()));
        }
        if copy.token_response.get("refresh_token").is_some() {
            copy.token_response
                .insert("refresh_token", Value::String("***".to_string()));
        }
        copy
    }

    /// Loads the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SmartError::Storage`] when the stored value is not a
    /// session record.
    pub async fn load(storage: &dyn Storage, key: &SessionKey) -> Result<Option<Self>> {
        match storage.get(key.as_str()).await? {
            Some(value) => {
                let record = serde_json::from_value(value).map_err(|e| {
                    SmartError::Storage(format!("malformed session record '{key}': {e}"))
                })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Stores the record under its own key.
    pub async fn save(&self, storage: &dyn Storage) -> Result<()> {
        let value = serde_json::to_value(self).map_err(SmartError::Serialization)?;
        storage.set(self.key.as_str(), value).await
    }
}

// ---------------------------------------------------------------------------
// Well-known pointer
// ---------------------------------------------------------------------------

/// Reads the key stored under [`SMART_KEY`].
pub async fn read_pointer(storage: &dyn Storage) -> Result<Option<SessionKey>> {
    Ok(storage
        .get(SMART_KEY)
        .await?
        .and_then(|v| v.as_str().map(SessionKey::from))
        .filter(|k| !k.as_str().is_empty()))
}

/// Points [`SMART_KEY`] at `key`.
pub async fn write_pointer(storage: &dyn Storage, key: &SessionKey) -> Result<()> {
    storage
        .set(SMART_KEY, Value::String(key.as_str().to_string()))
        .await
}

/// Removes [`SMART_KEY`].
pub async fn clear_pointer(storage: &dyn Storage) -> Result<()> {
    storage.unset(SMART_KEY).await
}
