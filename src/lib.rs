//! smart-launch - SMART on FHIR launch client library
//!
//! This library implements the client side of the SMART App Launch
//! authorization code flow: endpoint discovery, a per-launch session record
//! keyed by the OAuth `state`, token exchange, and session revival across
//! redirects and restarts.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `launch`: the launch state machine (`authorize`, `complete_auth`, `init`)
//! - `discovery`: `.well-known/smart-configuration` and capability statement lookup
//! - `token`: authorization code exchange
//! - `session`: session records, session keys and the well-known pointer
//! - `revival`: restoring a client from a stored session
//! - `env`: the environment adapter contract and its realizations
//! - `client`: the resulting access context
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli` / `commands`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use smart_launch::config::AuthSettings;
//! use smart_launch::env::HeadlessEnvironment;
//! use smart_launch::launch::{AuthorizeParams, InitOutcome, LaunchFlow};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let env = Arc::new(HeadlessEnvironment::with_memory_storage(Url::parse(
//!         "http://127.0.0.1:8765/callback?iss=https://launch.smarthealthit.org/v/r4/fhir",
//!     )?));
//!     let flow = LaunchFlow::new(reqwest::Client::new(), AuthSettings::default());
//!     let params = AuthorizeParams {
//!         client_id: Some("my_web_app".into()),
//!         scope: Some("launch/patient openid fhirUser".into()),
//!         ..Default::default()
//!     };
//!
//!     match flow.init(env, &params).await? {
//!         InitOutcome::Ready(client) => println!("patient: {:?}", client.patient_id()),
//!         InitOutcome::PendingRedirect { url } => println!("continue at {url}"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod env;
pub mod error;
pub mod http;
pub mod launch;
pub mod revival;
pub mod session;
pub mod token;

// Re-export commonly used types
pub use client::Client;
pub use config::{AuthSettings, Config};
pub use discovery::{resolve_security_endpoints, SecurityEndpoints};
pub use env::{Environment, Storage};
pub use error::{Result, SmartError};
pub use launch::{AuthorizeParams, InitOutcome, LaunchFlow, LaunchState};
pub use session::{SessionKey, SessionRecord, TokenResponse};
pub use token::build_token_request;

#[cfg(test)]
pub mod test_utils;
