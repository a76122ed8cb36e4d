//! Resource-access client context
//!
//! The end product of a launch: the final session record bundled with the
//! environment it was produced in.  Issuing FHIR requests is left to the
//! caller; this type only hands out what those requests need.

use std::fmt;
use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::env::Environment;
use crate::launch::LaunchState;
use crate::session::{SessionRecord, TokenResponse};

/// Authorized (or open-server) access context for one FHIR server.
pub struct Client {
    env: Arc<dyn Environment>,
    session: SessionRecord,
    state: LaunchState,
}

impl Client {
    /// Wraps a session record produced by a launch.
    pub fn new(env: Arc<dyn Environment>, session: SessionRecord, state: LaunchState) -> Self {
        Self {
            env,
            session,
            state,
        }
    }

    /// The state the launch finished in.
    pub fn state(&self) -> LaunchState {
        self.state
    }

    /// The session record backing this client.
    pub fn session(&self) -> &SessionRecord {
        &self.session
    }

    /// The environment the launch ran in.
    pub fn environment(&self) -> &Arc<dyn Environment> {
        &self.env
    }

    /// FHIR server base URL.
    pub fn server_url(&self) -> &str {
        &self.session.server_url
    }

    /// The token response, including launch context.
    pub fn token_response(&self) -> &TokenResponse {
        &self.session.token_response
    }

    /// The access token, absent for open servers.
    pub fn access_token(&self) -> Option<&str> {
        self.session.token_response.access_token()
    }

    /// Patient in context, if any.
    pub fn patient_id(&self) -> Option<&str> {
        self.session.token_response.patient()
    }

    /// Encounter in context, if any.
    pub fn encounter_id(&self) -> Option<&str> {
        self.session.token_response.encounter()
    }

    /// `Authorization` header value for FHIR requests.
    pub fn authorization_header(&self) -> Option<String> {
        self.access_token().map(|token| format!("Bearer {token}"))
    }

    /// Resolves `path` against the server URL.
    ///
    /// Absolute `http(s)` URLs and `urn:` identifiers pass through.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use smart_launch::client::Client;
    /// use smart_launch::env::HeadlessEnvironment;
    /// use smart_launch::launch::LaunchState;
    /// use smart_launch::session::{SessionKey, SessionRecord};
    /// use url::Url;
    ///
    /// let env = Arc::new(HeadlessEnvironment::with_memory_storage(Url::parse("http://app/").unwrap()));
    /// let record = SessionRecord::new(SessionKey::generate(), "https://fhir.example.com/r4/").unwrap();
    /// let client = Client::new(env, record, LaunchState::OpenServerBypass);
    ///
    /// assert_eq!(client.absolute_url("/Patient/123"), "https://fhir.example.com/r4/Patient/123");
    /// ```
    pub fn absolute_url(&self, path: &str) -> String {
        if path.starts_with("http") || path.starts_with("urn") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.session.server_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Returns `true` when the access token is expired or about to expire.
    ///
    /// A 60-second buffer is applied.  Sessions without `expires_in` or
    /// without an authorization timestamp never expire.
    pub fn is_expired(&self) -> bool {
        match (
            self.session.authorized_at,
            self.session.token_response.expires_in(),
        ) {
            (Some(at), Some(secs)) => {
                let expires_at = at + Duration::seconds(secs);
                Utc::now() >= expires_at - Duration::seconds(60)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state)
            .field("server_url", &self.session.server_url)
            .field("key", &self.session.key)
            .field("authorized", &self.session.is_authorized())
            .field("patient", &self.patient_id())
            .finish()
    }
}
