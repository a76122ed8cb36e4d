//! Authorization code exchange
//!
//! [`build_token_request`] describes the `POST` to the token endpoint without
//! sending it; [`exchange_code`] sends it and validates the response.
//!
//! Public clients cannot prove their identity, so they only name themselves
//! with `client_id` in the form body.  Confidential clients authenticate
//! with HTTP Basic credentials `client_id:client_secret` instead.  Which mode
//! is used depends solely on whether the session holds a client secret.

use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use url::form_urlencoded::byte_serialize;

use crate::error::{Result, SmartError};
use crate::http::fetch_json;
use crate::session::{SessionRecord, TokenResponse};

/// A fully described token endpoint request.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    /// Always `POST`.
    pub method: Method,

    /// The token endpoint.
    pub url: String,

    /// `Content-Type`, plus `Authorization` for confidential clients.
    pub headers: HeaderMap,

    /// `application/x-www-form-urlencoded` body.
    pub body: String,
}

impl TokenRequest {
    /// Whether the request authenticates with HTTP Basic credentials.
    pub fn is_confidential(&self) -> bool {
        self.headers.contains_key(AUTHORIZATION)
    }

    /// Turns the description into a sendable request.
    pub fn into_request_builder(self, http: &reqwest::Client) -> reqwest::RequestBuilder {
        http.request(self.method, self.url)
            .headers(self.headers)
            .body(self.body)
    }
}

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

/// Builds the token request that trades `code` for an access token.
///
/// # Errors
///
/// Returns [`SmartError::MissingStateField`] naming the first of
/// `redirectUri`, `tokenUri` or `clientId` that is missing from `record`.
///
/// # Examples
///
/// ```
/// use smart_launch::session::{SessionKey, SessionRecord};
/// use smart_launch::token::build_token_request;
///
/// let mut record = SessionRecord::new(SessionKey::generate(), "https://fhir.example.com").unwrap();
/// record.redirect_uri = "https://app.example.com/".to_string();
/// record.token_uri = "https://auth.example.com/token".to_string();
/// record.client_id = Some("my_app".to_string());
///
/// let request = build_token_request("abc", &record).unwrap();
/// assert!(request.body.starts_with("code=abc&grant_type=authorization_code"));
/// assert!(request.body.ends_with("&client_id=my_app"));
/// assert!(!request.is_confidential());
/// ```
pub fn build_token_request(code: &str, record: &SessionRecord) -> Result<TokenRequest> {
    if record.redirect_uri.is_empty() {
        return Err(SmartError::MissingStateField("redirectUri").into());
    }
    if record.token_uri.is_empty() {
        return Err(SmartError::MissingStateField("tokenUri").into());
    }
    let client_id = record
        .client_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or(SmartError::MissingStateField("clientId"))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );

    let mut body = format!(
        "code={}&grant_type=authorization_code&redirect_uri={}",
        encode(code),
        encode(&record.redirect_uri)
    );

    match record.client_secret.as_deref().filter(|s| !s.is_empty()) {
        Some(secret) => {
            let credentials = base64::engine::general_purpose::STANDARD
                .encode(format!("{client_id}:{secret}"));
            let value = HeaderValue::from_str(&format!("Basic {credentials}")).map_err(|e| {
                SmartError::Config(format!("client credentials are not a valid header: {e}"))
            })?;
            headers.insert(AUTHORIZATION, value);
            tracing::debug!("using client secret for HTTP Basic token authentication");
        }
        None => {
            body.push_str("&client_id=");
            body.push_str(&encode(client_id));
            tracing::debug!("no client secret, adding client_id to the token request body");
        }
    }

    Ok(TokenRequest {
        method: Method::POST,
        url: record.token_uri.clone(),
        headers,
        body,
    })
}

/// Exchanges `code` at the token endpoint of `record`.
///
/// # Errors
///
/// Returns [`SmartError::MissingStateField`] if the request cannot be built,
/// and [`SmartError::TokenExchange`] if the request fails or the response
/// carries no `access_token`.
pub async fn exchange_code(
    http: &reqwest::Client,
    code: &str,
    record: &SessionRecord,
) -> Result<TokenResponse> {
    let request = build_token_request(code, record)?;
    tracing::debug!(
        token_uri = %request.url,
        confidential = request.is_confidential(),
        "exchanging authorization code"
    );

    let value = fetch_json(request.into_request_builder(http))
        .await
        .map_err(|e| SmartError::TokenExchange(format!("token request failed: {e}")))?;

    let response = TokenResponse::from_value(value);
    if response.access_token().is_none() {
        return Err(SmartError::TokenExchange("failed to obtain access token".into()).into());
    }
    Ok(response)
}
