//! Error types for smart-launch
//!
//! This module defines all error types used throughout the crate, using
//! `thiserror` for ergonomic error handling.  Public functions return
//! [`Result`], an `anyhow` alias; callers that need to tell failure kinds
//! apart downcast to [`SmartError`].

use thiserror::Error;

/// Main error type for smart-launch operations
///
/// The variants map onto the failure kinds of an app launch: bad
/// configuration, a denied authorization, a missing or unresumable session,
/// and a failed token exchange, plus the I/O and serialization errors of the
/// collaborators underneath.
#[derive(Error, Debug)]
pub enum SmartError {
    /// Configuration-related errors (missing server url, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A session field required by the token request is absent
    #[error("Missing state.{0}")]
    MissingStateField(&'static str),

    /// A discovery tier failed to produce usable endpoints
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// The authorization server returned `error` / `error_description`
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// Neither the URL nor the well-known pointer yielded a session key
    #[error("No 'state' parameter found.")]
    NoStateParameter,

    /// A session key was resolved but no record is stored under it
    #[error("No state found! Please (re)launch the app.")]
    SessionNotFound,

    /// The token endpoint failed or returned no access token
    #[error("Token exchange error: {0}")]
    TokenExchange(String),

    /// Non-success HTTP response, with a human readable message
    #[error("HTTP {status}: {message}")]
    Http {
        /// Response status code
        status: u16,
        /// Status line, URL and any error details from the body
        message: String,
    },

    /// Session storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

/// Result type alias for smart-launch operations
///
/// Uses `anyhow::Error` as the error type so context can be attached while
/// the underlying [`SmartError`] stays recoverable via `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;
