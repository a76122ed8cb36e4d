//! Session revival
//!
//! Restores a [`Client`] from a persisted session record without any network
//! activity.  The key comes from the `state` URL parameter or, when session
//! storage is private to one window, from the well-known pointer.

use std::sync::Arc;

use url::Url;

use crate::client::Client;
use crate::config::AuthSettings;
use crate::env::{query_param, Environment, Storage};
use crate::error::Result;
use crate::launch::LaunchState;
use crate::session::{self, SessionKey, SessionRecord};

/// Resolves the key of the session to revive.
///
/// The `state` parameter of `url` wins.  The well-known pointer is consulted
/// only with full session storage support, since a pointer shared between
/// windows may belong to another launch.
pub async fn resolve_session_key(
    url: &Url,
    storage: &dyn Storage,
    settings: &AuthSettings,
) -> Result<Option<SessionKey>> {
    if let Some(state) = query_param(url, "state") {
        return Ok(Some(SessionKey::from(state)));
    }
    if settings.full_session_storage_support {
        return session::read_pointer(storage).await;
    }
    Ok(None)
}

/// Builds a client from the stored session for the current URL, if any.
///
/// Returns `Ok(None)` when no key resolves or nothing is stored under it.
///
/// # Errors
///
/// Returns storage errors, including a stored value that is not a session
/// record.
pub async fn revive(env: Arc<dyn Environment>, settings: &AuthSettings) -> Result<Option<Client>> {
    let storage = env.storage();
    let Some(key) = resolve_session_key(&env.url(), storage.as_ref(), settings).await? else {
        tracing::debug!("no session key to revive");
        return Ok(None);
    };

    match SessionRecord::load(storage.as_ref(), &key).await? {
        Some(record) => {
            tracing::info!(key = %key, server_url = %record.server_url, "revived stored session");
            Ok(Some(Client::new(env, record, LaunchState::Revived)))
        }
        None => {
            tracing::debug!(key = %key, "no stored session for key");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{HeadlessEnvironment, MemoryStorage};
    use crate::session::TokenResponse;
    use serde_json::json;

    async fn storage_with_session(key: &str) -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        let mut record = SessionRecord::new(SessionKey::from(key), "http://fhir").unwrap();
        record.token_response = TokenResponse::from_value(json!({"access_token": "tok"}));
        record.save(storage.as_ref()).await.unwrap();
        storage
    }

    fn env_at(url: &str, storage: Arc<MemoryStorage>) -> Arc<HeadlessEnvironment> {
        Arc::new(HeadlessEnvironment::new(Url::parse(url).unwrap(), storage))
    }

    #[tokio::test]
    async fn test_state_parameter_wins_over_pointer() {
        let storage = MemoryStorage::new();
        session::write_pointer(&storage, &SessionKey::from("pointer"))
            .await
            .unwrap();
        let url = Url::parse("http://app/?state=from-url").unwrap();
        let key = resolve_session_key(&url, &storage, &AuthSettings::default())
            .await
            .unwrap();
        assert_eq!(key, Some(SessionKey::from("from-url")));
    }

    #[tokio::test]
    async fn test_pointer_ignored_without_full_session_storage() {
        let storage = MemoryStorage::new();
        session::write_pointer(&storage, &SessionKey::from("pointer"))
            .await
            .unwrap();
        let url = Url::parse("http://app/").unwrap();
        let settings = AuthSettings {
            full_session_storage_support: false,
            ..AuthSettings::default()
        };
        assert!(resolve_session_key(&url, &storage, &settings)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            resolve_session_key(&url, &storage, &AuthSettings::default())
                .await
                .unwrap(),
            Some(SessionKey::from("pointer"))
        );
    }

    #[tokio::test]
    async fn test_revive_by_state_parameter() {
        let storage = storage_with_session("abc").await;
        let env = env_at("http://app/?state=abc", storage);
        let client = revive(env.clone(), &AuthSettings::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.state(), LaunchState::Revived);
        assert_eq!(client.access_token(), Some("tok"));
        assert!(env.redirects().is_empty());
    }

    #[tokio::test]
    async fn test_revive_missing_session_is_none() {
        let storage = storage_with_session("abc").await;
        let env = env_at("http://app/?state=other", storage);
        assert!(revive(env, &AuthSettings::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revive_malformed_record_is_error() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("bad", json!("not a record")).await.unwrap();
        let env = env_at("http://app/?state=bad", storage);
        assert!(revive(env, &AuthSettings::default()).await.is_err());
    }
}
