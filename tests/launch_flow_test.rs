//! Launch flow integration tests
//!
//! Drives `LaunchFlow` end to end against wiremock discovery and token
//! endpoints, with headless and browser environments standing in for the
//! page that is redirected away from and back to.

use std::sync::Arc;

use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use smart_launch::env::{
    query_param, BrowserEnvironment, Environment, HeadlessEnvironment, MemoryStorage, Storage,
};
use smart_launch::session::{read_pointer, SessionKey, SessionRecord};
use smart_launch::{AuthSettings, AuthorizeParams, InitOutcome, LaunchFlow, LaunchState, SmartError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const APP_URL: &str = "http://app.example.com/launch.html";

fn flow() -> LaunchFlow {
    LaunchFlow::new(reqwest::Client::new(), AuthSettings::default())
}

fn headless(url: &str, storage: Arc<MemoryStorage>) -> Arc<HeadlessEnvironment> {
    Arc::new(HeadlessEnvironment::new(Url::parse(url).unwrap(), storage))
}

fn params(iss: &str) -> AuthorizeParams {
    AuthorizeParams {
        iss: Some(iss.to_string()),
        client_id: Some("my_web_app".to_string()),
        scope: Some("patient/*.read openid".to_string()),
        redirect_uri: Some("./callback".to_string()),
        ..Default::default()
    }
}

/// Mounts a smart-configuration pointing at `/authorize` and `/token` on
/// the same mock server.
async fn mount_smart_configuration(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/smart-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authorization_endpoint": format!("{}/authorize", server.uri()),
            "token_endpoint": format!("{}/token", server.uri())
        })))
        .mount(server)
        .await;
}

async fn mount_token_endpoint(server: &MockServer, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "the-token",
            "token_type": "Bearer",
            "expires_in": 3600,
            "patient": "smart-1288992"
        })))
        .expect(expected)
        .mount(server)
        .await;
}

fn query(url: &str, name: &str) -> Option<String> {
    query_param(&Url::parse(url).unwrap(), name)
}

/// The URL the authorization server would send the browser back to.
fn callback_url(redirect: &str, code: &str) -> String {
    let state = query(redirect, "state").unwrap();
    let redirect_uri = query(redirect, "redirect_uri").unwrap();
    format!("{}?code={}&state={}", redirect_uri, code, state)
}

// ---------------------------------------------------------------------------
// authorize
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fhir_service_url_bypasses_discovery() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let env = headless(APP_URL, Arc::new(MemoryStorage::new()));
    let params = AuthorizeParams {
        fhir_service_url: Some(server.uri()),
        ..Default::default()
    };
    let url = flow().authorize(env.as_ref(), &params).await.unwrap();

    let parsed = Url::parse(&url).unwrap();
    assert_eq!(parsed.path(), "/");
    assert_eq!(parsed.query_pairs().count(), 1);
    assert!(query(&url, "state").is_some());
}

#[tokio::test]
async fn test_standard_launch_builds_authorization_url() {
    let server = MockServer::start().await;
    mount_smart_configuration(&server).await;

    let env = headless(APP_URL, Arc::new(MemoryStorage::new()));
    let url = flow()
        .authorize(env.as_ref(), &params(&server.uri()))
        .await
        .unwrap();

    assert!(url.starts_with(&format!("{}/authorize?", server.uri())));
    assert_eq!(query(&url, "response_type").as_deref(), Some("code"));
    assert_eq!(query(&url, "client_id").as_deref(), Some("my_web_app"));
    assert_eq!(query(&url, "scope").as_deref(), Some("patient/*.read openid"));
    assert_eq!(
        query(&url, "redirect_uri").as_deref(),
        Some("http://app.example.com/callback")
    );
    assert_eq!(query(&url, "aud"), Some(server.uri()));
    assert!(query(&url, "launch").is_none());

    let key = SessionKey::from(query(&url, "state").unwrap());
    let record = SessionRecord::load(env.storage().as_ref(), &key)
        .await
        .unwrap()
        .expect("record persisted before redirect");
    assert_eq!(record.server_url, server.uri());
    assert_eq!(record.token_uri, format!("{}/token", server.uri()));
    assert_eq!(env.last_redirect(), Some(url));
}

#[tokio::test]
async fn test_ehr_launch_adds_launch_scope_and_parameter() {
    let server = MockServer::start().await;
    mount_smart_configuration(&server).await;

    let launch_url = format!("{}?iss={}&launch=xyz123", APP_URL, server.uri());
    let env = headless(&launch_url, Arc::new(MemoryStorage::new()));
    let params = AuthorizeParams {
        client_id: Some("my_web_app".to_string()),
        scope: Some("openid".to_string()),
        ..Default::default()
    };
    let url = flow().authorize(env.as_ref(), &params).await.unwrap();

    assert_eq!(query(&url, "launch").as_deref(), Some("xyz123"));
    assert_eq!(query(&url, "scope").as_deref(), Some("openid launch"));
    assert_eq!(
        query(&url, "redirect_uri").as_deref(),
        Some("http://app.example.com/")
    );
}

#[tokio::test]
async fn test_open_server_redirects_with_state_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/smart-configuration"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rest": [{}]})))
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let env = headless(APP_URL, storage.clone());
    let url = flow()
        .authorize(env.as_ref(), &params(&server.uri()))
        .await
        .unwrap();

    assert!(url.starts_with("http://app.example.com/callback?state="));

    env.set_url(Url::parse(&url).unwrap());
    let client = flow().complete_auth(env.clone()).await.unwrap();
    assert_eq!(client.state(), LaunchState::OpenServerBypass);
    assert!(client.access_token().is_none());
    assert_eq!(client.server_url(), server.uri());
}

// ---------------------------------------------------------------------------
// complete_auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_code_exchange_then_reload_is_idempotent() {
    let server = MockServer::start().await;
    mount_smart_configuration(&server).await;
    mount_token_endpoint(&server, 1).await;

    let storage = Arc::new(MemoryStorage::new());
    let env = headless(APP_URL, storage.clone());
    let redirect = flow()
        .authorize(env.as_ref(), &params(&server.uri()))
        .await
        .unwrap();

    env.set_url(Url::parse(&callback_url(&redirect, "auth-code")).unwrap());
    let first = flow().complete_auth(env.clone()).await.unwrap();
    assert_eq!(first.state(), LaunchState::Authorized);
    assert_eq!(first.access_token(), Some("the-token"));
    assert_eq!(first.patient_id(), Some("smart-1288992"));
    assert!(!first.is_expired());

    let pointer = read_pointer(storage.as_ref()).await.unwrap();
    assert_eq!(pointer.as_ref(), Some(&first.session().key));

    // Reload with `code` stripped: no second token request.
    env.set_url(Url::parse("http://app.example.com/callback").unwrap());
    let second = flow().complete_auth(env.clone()).await.unwrap();
    assert_eq!(second.state(), LaunchState::Authorized);
    assert_eq!(second.session(), first.session());
}

#[tokio::test]
async fn test_pointer_not_written_without_full_session_storage() {
    let server = MockServer::start().await;
    mount_smart_configuration(&server).await;
    mount_token_endpoint(&server, 1).await;

    let settings = AuthSettings {
        full_session_storage_support: false,
        ..AuthSettings::default()
    };
    let flow = LaunchFlow::new(reqwest::Client::new(), settings);

    let storage = Arc::new(MemoryStorage::new());
    let env = headless(APP_URL, storage.clone());
    let redirect = flow
        .authorize(env.as_ref(), &params(&server.uri()))
        .await
        .unwrap();
    env.set_url(Url::parse(&callback_url(&redirect, "c")).unwrap());
    flow.complete_auth(env.clone()).await.unwrap();

    assert!(read_pointer(storage.as_ref()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_code_exchange_replaces_seeded_token_values() {
    let server = MockServer::start().await;
    mount_smart_configuration(&server).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "real"})))
        .expect(1)
        .mount(&server)
        .await;

    let env = headless(APP_URL, Arc::new(MemoryStorage::new()));
    let seeded = AuthorizeParams {
        patient_id: Some("fixed-dev-patient".to_string()),
        fake_token_response: json!({"refresh_token": "fake-rt", "expires_in": 1})
            .as_object()
            .cloned(),
        ..params(&server.uri())
    };
    let redirect = flow().authorize(env.as_ref(), &seeded).await.unwrap();

    env.set_url(Url::parse(&callback_url(&redirect, "auth-code")).unwrap());
    let client = flow().complete_auth(env.clone()).await.unwrap();

    assert_eq!(client.state(), LaunchState::Authorized);
    assert_eq!(
        client.session().token_response.as_map(),
        json!({"access_token": "real"}).as_object().unwrap()
    );
    assert!(client.patient_id().is_none());
    assert!(client.session().authorized_at.is_some());
}

#[tokio::test]
async fn test_relative_endpoints_resolve_against_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/smart-configuration"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rest": [{
                "security": {
                    "extension": [{
                        "url": smart_launch::discovery::OAUTH_URIS_EXTENSION,
                        "extension": [
                            {"url": "authorize", "valueUri": "/auth/authorize"},
                            {"url": "token", "valueUri": "/auth/token"}
                        ]
                    }]
                }
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "t"})))
        .expect(1)
        .mount(&server)
        .await;

    let env = headless(APP_URL, Arc::new(MemoryStorage::new()));
    let redirect = flow()
        .authorize(env.as_ref(), &params(&server.uri()))
        .await
        .unwrap();
    assert!(redirect.starts_with(&format!("{}/auth/authorize?", server.uri())));

    env.set_url(Url::parse(&callback_url(&redirect, "c")).unwrap());
    let client = flow().complete_auth(env.clone()).await.unwrap();
    assert_eq!(client.session().token_uri, format!("{}/auth/token", server.uri()));
    assert_eq!(client.access_token(), Some("t"));
}

#[tokio::test]
async fn test_denial_is_reported_before_touching_storage() {
    let storage = Arc::new(MemoryStorage::new());
    let env = headless(
        "http://app.example.com/callback?error=access_denied&error_description=user+declined&state=abc",
        storage.clone(),
    );
    let err = flow().complete_auth(env).await.unwrap_err();

    match err.downcast_ref::<SmartError>() {
        Some(SmartError::AuthorizationDenied(msg)) => {
            assert!(msg.contains("access_denied"));
            assert!(msg.contains("user declined"));
        }
        other => panic!("expected AuthorizationDenied, got {:?}", other),
    }
    assert!(storage.is_empty().await);
}

#[tokio::test]
async fn test_missing_state_everywhere() {
    let env = headless("http://app.example.com/callback?code=abc", Arc::new(MemoryStorage::new()));
    let err = flow().complete_auth(env).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SmartError>(),
        Some(SmartError::NoStateParameter)
    ));
    assert_eq!(err.to_string(), "No 'state' parameter found.");
}

#[tokio::test]
async fn test_direct_page_load_without_session() {
    let env = headless(
        "http://app.example.com/callback?state=neverStored12345",
        Arc::new(MemoryStorage::new()),
    );
    let err = flow().complete_auth(env).await.unwrap_err();
    assert_eq!(err.to_string(), "No state found! Please (re)launch the app.");
}

#[tokio::test]
async fn test_fake_token_response_round_trip() {
    let storage = Arc::new(MemoryStorage::new());
    let env = headless(APP_URL, storage);
    let params = AuthorizeParams {
        fhir_service_url: Some("http://fhir.example.com/r4".to_string()),
        fake_token_response: json!({"access_token": "abc", "patient": "123"})
            .as_object()
            .cloned(),
        ..Default::default()
    };
    let redirect = flow().authorize(env.as_ref(), &params).await.unwrap();

    env.set_url(Url::parse(&redirect).unwrap());
    let client = flow().complete_auth(env.clone()).await.unwrap();
    assert_eq!(
        serde_json::to_value(client.token_response()).unwrap(),
        json!({"access_token": "abc", "patient": "123"})
    );
}

// ---------------------------------------------------------------------------
// URL cleaning in interactive environments
// ---------------------------------------------------------------------------

async fn browser_after_exchange(
    settings: AuthSettings,
    history_replace: bool,
) -> (Arc<BrowserEnvironment>, String) {
    let server = MockServer::start().await;
    mount_smart_configuration(&server).await;
    mount_token_endpoint(&server, 1).await;

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let flow = LaunchFlow::new(reqwest::Client::new(), settings);

    let env = Arc::new(
        BrowserEnvironment::new(Url::parse(APP_URL).unwrap(), storage.clone())
            .with_browser_launch(false)
            .with_history_replace(history_replace),
    );
    let redirect = flow
        .authorize(env.as_ref(), &params(&server.uri()))
        .await
        .unwrap();
    let callback = format!("{}&extra=kept", callback_url(&redirect, "c"));

    // The browser comes back to the redirect URI.
    let env = Arc::new(
        BrowserEnvironment::new(Url::parse(&callback).unwrap(), storage)
            .with_browser_launch(false)
            .with_history_replace(history_replace),
    );
    flow.complete_auth(env.clone()).await.unwrap();
    let state = query(&callback, "state").unwrap();
    (env, state)
}

#[tokio::test]
async fn test_code_and_state_stripped_with_full_session_storage() {
    let (env, _) = browser_after_exchange(AuthSettings::default(), true).await;
    assert_eq!(
        env.url().as_str(),
        "http://app.example.com/callback?extra=kept"
    );
    assert!(env.navigations().is_empty(), "replaced in place, no navigation");
}

#[tokio::test]
async fn test_state_kept_without_full_session_storage() {
    let settings = AuthSettings {
        full_session_storage_support: false,
        ..AuthSettings::default()
    };
    let (env, state) = browser_after_exchange(settings, true).await;
    assert_eq!(query(env.url().as_str(), "state"), Some(state));
    assert!(query(env.url().as_str(), "code").is_none());
}

#[tokio::test]
async fn test_navigates_when_history_replace_unsupported() {
    let (env, _) = browser_after_exchange(AuthSettings::default(), false).await;
    assert_eq!(
        env.navigations(),
        vec!["http://app.example.com/callback?extra=kept".to_string()]
    );
}

#[tokio::test]
async fn test_url_untouched_when_history_replacement_disabled() {
    let settings = AuthSettings {
        replace_browser_history: false,
        ..AuthSettings::default()
    };
    let (env, _) = browser_after_exchange(settings, true).await;
    assert!(query(env.url().as_str(), "code").is_some());
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_init_walks_the_whole_launch() {
    let server = MockServer::start().await;
    mount_smart_configuration(&server).await;
    mount_token_endpoint(&server, 1).await;

    let storage = Arc::new(MemoryStorage::new());
    let env = headless(APP_URL, storage.clone());

    // First load: nothing stored, so init starts a launch.
    let redirect = match flow().init(env.clone(), &params(&server.uri())).await.unwrap() {
        InitOutcome::PendingRedirect { url } => url,
        InitOutcome::Ready(client) => panic!("unexpected client {:?}", client),
    };

    // Second load: back from the authorization server with a code.
    env.set_url(Url::parse(&callback_url(&redirect, "c")).unwrap());
    let outcome = flow().init(env.clone(), &params(&server.uri())).await.unwrap();
    assert!(!outcome.is_pending());
    assert_eq!(outcome.into_client().unwrap().state(), LaunchState::Authorized);

    // Third load: plain page, revived through the well-known pointer.
    env.set_url(Url::parse("http://app.example.com/callback").unwrap());
    let revived = flow()
        .init(env.clone(), &params(&server.uri()))
        .await
        .unwrap()
        .into_client()
        .unwrap();
    assert_eq!(revived.state(), LaunchState::Revived);
    assert_eq!(revived.access_token(), Some("the-token"));
}

#[tokio::test]
async fn test_init_without_server_fails_immediately() {
    let env = headless(APP_URL, Arc::new(MemoryStorage::new()));
    let err = flow()
        .init(env.clone(), &AuthorizeParams::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No server url found"));
    assert!(env.redirects().is_empty());
}
