//! JSON-over-HTTP helper shared by discovery and token exchange

use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Response};
use serde_json::Value;

use crate::error::{Result, SmartError};

/// Sends `request` and decodes the response body as JSON.
///
/// An empty body decodes to [`Value::Null`].  Non-success responses become
/// [`SmartError::Http`] with a message naming the status, the URL and any
/// `error` / `error_description` pair found in the body.
///
/// # Examples
///
/// ```no_run
/// use smart_launch::http::fetch_json;
///
/// # async fn example() -> smart_launch::error::Result<()> {
/// let http = reqwest::Client::new();
/// let metadata = fetch_json(http.get("https://fhir.example.com/metadata")).await?;
/// println!("{}", metadata["fhirVersion"]);
/// # Ok(())
/// # }
/// ```
pub async fn fetch_json(request: RequestBuilder) -> Result<Value> {
    let resp = request
        .header(ACCEPT, "application/json")
        .send()
        .await
        .map_err(SmartError::Request)?;

    if !resp.status().is_success() {
        return Err(humanize_error(resp).await.into());
    }

    let text = resp.text().await.map_err(SmartError::Request)?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).map_err(SmartError::Serialization)?)
}

/// Builds a readable [`SmartError::Http`] from a failed response.
async fn humanize_error(resp: Response) -> SmartError {
    let status = resp.status();
    let mut message = format!(
        "{} {}\nURL: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        resp.url()
    );

    let body = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<Value>(&body) {
        Ok(json) => {
            if let Some(error) = json.get("error").and_then(Value::as_str) {
                message.push('\n');
                message.push_str(error);
                if let Some(desc) = json.get("error_description").and_then(Value::as_str) {
                    message.push_str(": ");
                    message.push_str(desc);
                }
            } else {
                message.push_str("\n\n");
                message.push_str(&serde_json::to_string_pretty(&json).unwrap_or(body));
            }
        }
        Err(_) if !body.is_empty() => {
            message.push_str("\n\n");
            message.push_str(&body);
        }
        Err(_) => {}
    }

    SmartError::Http {
        status: status.as_u16(),
        message,
    }
}
