//! Configuration management for smart-launch
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::env::{MemoryStorage, PersistentStorage, Storage};
use crate::error::{Result, SmartError};
use crate::launch::AuthorizeParams;

/// Main configuration structure for smart-launch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Registered client details
    #[serde(default)]
    pub client: ClientConfig,

    /// Launch parameters and development overrides
    #[serde(default)]
    pub launch: LaunchConfig,

    /// Behaviour switches for completing authorization
    #[serde(default)]
    pub settings: AuthSettings,

    /// Session storage location
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,
}

/// OAuth client registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client identifier issued by the authorization server
    #[serde(default)]
    pub client_id: Option<String>,

    /// Secret of a confidential client
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Space-separated scopes to request
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Redirect URI registered for the client
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

fn default_scope() -> String {
    "launch/patient openid fhirUser".to_string()
}

fn default_redirect_uri() -> String {
    "http://127.0.0.1:8765/callback".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            scope: default_scope(),
            redirect_uri: default_redirect_uri(),
        }
    }
}

/// Launch parameters
///
/// `patient_id`, `encounter_id` and `fake_token_response` are development
/// overrides copied into the session's token response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Issuer (FHIR server) for a standard launch
    #[serde(default)]
    pub iss: Option<String>,

    /// FHIR server to use without authorization
    #[serde(default)]
    pub fhir_service_url: Option<String>,

    /// EHR launch token
    #[serde(default)]
    pub launch: Option<String>,

    /// Fixed patient in context
    #[serde(default)]
    pub patient_id: Option<String>,

    /// Fixed encounter in context
    #[serde(default)]
    pub encounter_id: Option<String>,

    /// Token response to pre-seed into the session
    #[serde(default)]
    pub fake_token_response: Option<Value>,
}

/// Switches consulted while completing authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Strip consumed `code` / `state` parameters from the current URL
    #[serde(default = "default_true")]
    pub replace_browser_history: bool,

    /// Session storage is private to one window, so the well-known pointer
    /// can stand in for the `state` parameter
    #[serde(default = "default_true")]
    pub full_session_storage_support: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            replace_browser_history: true,
            full_session_storage_support: true,
        }
    }
}

/// Session storage location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of the sled database; platform data dir when unset
    #[serde(default)]
    pub path: Option<String>,

    /// Keep sessions in memory only
    #[serde(default)]
    pub in_memory: bool,
}

/// HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Timeout for discovery and token requests (seconds)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from file, environment, and CLI
    ///
    /// A missing file yields the defaults.  Environment variables override
    /// the file and CLI flags override both.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file {} not found, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    /// Parse configuration from a YAML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SmartError::Config(format!("Failed to read {}: {}", path, e)))?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    fn apply_env_vars(&mut self) {
        if let Ok(iss) = std::env::var("SMART_ISS") {
            self.launch.iss = Some(iss);
        }
        if let Ok(url) = std::env::var("SMART_FHIR_SERVICE_URL") {
            self.launch.fhir_service_url = Some(url);
        }
        if let Ok(client_id) = std::env::var("SMART_CLIENT_ID") {
            self.client.client_id = Some(client_id);
        }
        if let Ok(secret) = std::env::var("SMART_CLIENT_SECRET") {
            self.client.client_secret = Some(secret);
        }
        if let Ok(scope) = std::env::var("SMART_SCOPE") {
            self.client.scope = scope;
        }
        if let Ok(redirect_uri) = std::env::var("SMART_REDIRECT_URI") {
            self.client.redirect_uri = redirect_uri;
        }
        if let Ok(path) = std::env::var("SMART_STORAGE_PATH") {
            self.storage.path = Some(path);
        }
        if let Ok(timeout) = std::env::var("SMART_HTTP_TIMEOUT_SECONDS") {
            match timeout.parse() {
                Ok(secs) => self.http.timeout_seconds = secs,
                Err(_) => tracing::warn!(
                    "Ignoring invalid SMART_HTTP_TIMEOUT_SECONDS value: {}",
                    timeout
                ),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(path) = &cli.storage_path {
            self.storage.path = Some(path.clone());
        }
        if cli.in_memory {
            self.storage.in_memory = true;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.http.timeout_seconds == 0 {
            return Err(SmartError::Config("http.timeout_seconds must be greater than 0".into()).into());
        }

        if let Some(fake) = &self.launch.fake_token_response {
            if !fake.is_object() {
                return Err(SmartError::Config(
                    "launch.fake_token_response must be a mapping".into(),
                )
                .into());
            }
        }

        if self.client.redirect_uri.trim().is_empty() {
            return Err(SmartError::Config("client.redirect_uri must not be empty".into()).into());
        }

        Ok(())
    }

    /// Builds the `authorize` parameters described by this configuration.
    pub fn authorize_params(&self) -> AuthorizeParams {
        AuthorizeParams {
            iss: self.launch.iss.clone(),
            fhir_service_url: self.launch.fhir_service_url.clone(),
            launch: self.launch.launch.clone(),
            redirect_uri: Some(self.client.redirect_uri.clone()),
            client_id: self.client.client_id.clone(),
            scope: Some(self.client.scope.clone()),
            client_secret: self.client.client_secret.clone(),
            patient_id: self.launch.patient_id.clone(),
            encounter_id: self.launch.encounter_id.clone(),
            fake_token_response: self
                .launch
                .fake_token_response
                .as_ref()
                .and_then(Value::as_object)
                .map(Map::clone),
        }
    }

    /// Builds the shared HTTP client.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.http.timeout_seconds))
            .user_agent(concat!("smart-launch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(client)
    }

    /// Opens the configured session storage.
    pub fn open_storage(&self) -> Result<Arc<dyn Storage>> {
        if self.storage.in_memory {
            return Ok(Arc::new(MemoryStorage::new()));
        }
        let storage = match &self.storage.path {
            Some(path) => PersistentStorage::open(path)?,
            None => PersistentStorage::open_default()?,
        };
        Ok(Arc::new(storage))
    }
}
