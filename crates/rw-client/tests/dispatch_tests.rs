//! Dispatcher Integration Tests
//!
//! Tests for:
//! - Bearer token attachment and pass-through responses
//! - Lazy refresh of expired tokens (exactly one refresh call)
//! - Session end on failed refresh and on 401
//! - Multipart uploads without an explicit Content-Type
//! - Store round trip between refresh and the next dispatch
//! - Single-flight refresh under concurrent dispatches
//! - Error annotation for non-401 failures

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rw_client::{
    ApiClient, ApiRequest, AuthExpiredReason, ClientConfig, CredentialStore, DispatchError,
    MemoryCredentialStore, MultipartPart, RefreshPolicy, SessionListener, Token,
};

fn token_expiring_in(secs: i64, jti: &str) -> Token {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = serde_json::json!({
        "sub": "tenant-7",
        "jti": jti,
        "exp": Utc::now().timestamp() + secs,
    });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    Token::new(format!("{}.{}.signature", header, payload))
}

fn bearer(token: &Token) -> String {
    format!("Bearer {}", token.as_str())
}

#[derive(Default)]
struct RecordingListener {
    reasons: std::sync::Mutex<Vec<AuthExpiredReason>>,
    calls: AtomicUsize,
}

impl SessionListener for RecordingListener {
    fn on_session_expired(&self, reason: &AuthExpiredReason) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reasons.lock().unwrap().push(reason.clone());
    }
}

fn client_for(
    server: &MockServer,
    store: Arc<MemoryCredentialStore>,
    listener: Arc<RecordingListener>,
) -> ApiClient {
    ApiClient::builder(ClientConfig::new(server.uri()), store)
        .listener(listener)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_valid_token_is_attached_and_response_passed_through() {
    let server = MockServer::start().await;
    let token = token_expiring_in(3600, "valid");

    Mock::given(method("GET"))
        .and(path("/api/properties"))
        .and(header("authorization", bearer(&token).as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-total-count", "2")
                .set_body_json(serde_json::json!([{ "id": "p1" }, { "id": "p2" }])),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_token(token));
    let client = client_for(&server, store, Arc::default());

    let response = client.get("/api/properties").await.unwrap();

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.headers["x-total-count"], "2");
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body[1]["id"], "p2");
}

#[tokio::test]
async fn test_expired_token_refreshed_once_before_request() {
    let server = MockServer::start().await;
    let expired = token_expiring_in(-60, "old");
    let fresh = token_expiring_in(3600, "new");

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(body_json(serde_json::json!({ "token": expired.as_str() })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": fresh.as_str() })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/leases"))
        .and(header("authorization", bearer(&fresh).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_token(expired));
    let client = client_for(&server, store.clone(), Arc::default());

    let response = client.get("/api/leases").await.unwrap();

    assert_eq!(response.text(), "[]");
    assert_eq!(store.get().await.unwrap(), Some(fresh));
}

#[tokio::test]
async fn test_failed_refresh_sends_no_request_and_clears_store() {
    let server = MockServer::start().await;
    let expired = token_expiring_in(-60, "old");

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_string("refresh token expired"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/payments"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_token(expired));
    let listener = Arc::new(RecordingListener::default());
    let client = client_for(&server, store.clone(), listener.clone());

    let err = client.get("/api/payments").await.unwrap_err();

    assert!(err.is_auth_expired());
    assert!(matches!(
        err,
        DispatchError::AuthExpired {
            reason: AuthExpiredReason::RefreshFailed(_)
        }
    ));
    assert!(store.get().await.unwrap().is_none());
    assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreachable_refresh_endpoint_ends_session() {
    let expired = token_expiring_in(-60, "old");
    let store = Arc::new(MemoryCredentialStore::with_token(expired));
    let listener = Arc::new(RecordingListener::default());

    let config = ClientConfig::new(closed_port_url()).with_timeouts(Duration::from_secs(2), Duration::from_secs(1));
    let client = ApiClient::builder(config, store.clone())
        .listener(listener.clone())
        .build()
        .unwrap();

    let err = client.get("/api/notifications").await.unwrap_err();

    assert!(err.is_auth_expired());
    assert!(store.get().await.unwrap().is_none());
    assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unauthorized_response_ends_session_without_refresh() {
    let server = MockServer::start().await;
    let token = token_expiring_in(3600, "revoked");

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token revoked"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_token(token));
    let listener = Arc::new(RecordingListener::default());
    let client = client_for(&server, store.clone(), listener.clone());

    let err = client.get("/api/messages").await.unwrap_err();

    assert!(matches!(
        err,
        DispatchError::AuthExpired {
            reason: AuthExpiredReason::Unauthorized
        }
    ));
    assert!(store.get().await.unwrap().is_none());
    assert_eq!(
        *listener.reasons.lock().unwrap(),
        vec![AuthExpiredReason::Unauthorized]
    );
}

#[tokio::test]
async fn test_multipart_upload_uses_transport_boundary() {
    let server = MockServer::start().await;
    let token = token_expiring_in(3600, "upload");

    Mock::given(method("POST"))
        .and(path("/api/documents"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": "doc-9" })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_token(token.clone()));
    let client = client_for(&server, store, Arc::default());

    let request = ApiRequest::post("/api/documents")
        .multipart(vec![
            MultipartPart::text("category", "lease"),
            MultipartPart::file(
                "file",
                "lease.pdf",
                b"%PDF-1.7 lease body".to_vec(),
                Some("application/pdf".to_string()),
            ),
        ])
        .header("Content-Type", "application/json");

    let response = client.request(request).await.unwrap();
    assert_eq!(response.status.as_u16(), 201);

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);

    let content_types: Vec<_> = received[0].headers.get_all("content-type").iter().collect();
    assert_eq!(content_types.len(), 1);
    let content_type = content_types[0].to_str().unwrap();
    assert!(content_type.starts_with("multipart/form-data; boundary="));

    assert_eq!(received[0].headers["authorization"], bearer(&token).as_str());
    let body = String::from_utf8_lossy(&received[0].body);
    assert!(body.contains("%PDF-1.7 lease body"));
    assert!(body.contains("filename=\"lease.pdf\""));
}

#[tokio::test]
async fn test_refreshed_token_used_by_next_dispatch() {
    let server = MockServer::start().await;
    let expired = token_expiring_in(-60, "old");
    let fresh = token_expiring_in(3600, "new");

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": fresh.as_str() })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(header("authorization", bearer(&fresh).as_str()))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_token(expired));
    let client = client_for(&server, store.clone(), Arc::default());

    client.get("/api/notifications").await.unwrap();
    assert_eq!(store.get().await.unwrap(), Some(fresh.clone()));

    let response = client.get("/api/notifications").await.unwrap();
    assert_eq!(response.status.as_u16(), 204);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_concurrent_dispatches_share_one_refresh() {
    let server = MockServer::start().await;
    let expired = token_expiring_in(-60, "old");
    let fresh = token_expiring_in(3600, "new");

    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "token": fresh.as_str() }))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/properties"))
        .and(header("authorization", bearer(&fresh).as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(5)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_token(expired));
    let config = ClientConfig::new(server.uri()).with_refresh_policy(RefreshPolicy::SingleFlight);
    let client = ApiClient::new(config, store).unwrap();

    let results = futures::future::join_all((0..5).map(|_| client.get("/api/properties"))).await;

    assert!(results.iter().all(|r| r.is_ok()));
}

#[tokio::test]
async fn test_server_error_is_annotated() {
    let server = MockServer::start().await;
    let token = token_expiring_in(3600, "valid");

    Mock::given(method("DELETE"))
        .and(path("/api/leases/42"))
        .respond_with(ResponseTemplate::new(409).set_body_string("lease has open payments"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_token(token.clone()));
    let listener = Arc::new(RecordingListener::default());
    let client = client_for(&server, store.clone(), listener.clone());

    let err = client.delete("/api/leases/42").await.unwrap_err();

    match err {
        DispatchError::Status {
            method,
            url,
            status,
            body,
        } => {
            assert_eq!(method, reqwest::Method::DELETE);
            assert_eq!(url, format!("{}/api/leases/42", server.uri()));
            assert_eq!(status.as_u16(), 409);
            assert_eq!(body, "lease has open payments");
        }
        other => panic!("expected Status error, got {:?}", other),
    }

    // Non-auth failures leave the session alone
    assert_eq!(store.get().await.unwrap(), Some(token));
    assert_eq!(listener.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_transport_error_is_annotated() {
    let token = token_expiring_in(3600, "valid");
    let store = Arc::new(MemoryCredentialStore::with_token(token));
    let base = closed_port_url();
    let config = ClientConfig::new(base.clone()).with_timeouts(Duration::from_secs(2), Duration::from_secs(1));
    let client = ApiClient::new(config, store).unwrap();

    let err = client.get("/api/properties").await.unwrap_err();

    match err {
        DispatchError::Transport { method, url, .. } => {
            assert_eq!(method, reqwest::Method::GET);
            assert_eq!(url, format!("{}/api/properties", base));
        }
        other => panic!("expected Transport error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_json_body_and_caller_headers() {
    let server = MockServer::start().await;
    let token = token_expiring_in(3600, "valid");

    Mock::given(method("POST"))
        .and(path("/api/messages"))
        .and(header("content-type", "application/json"))
        .and(header("x-idempotency-key", "msg-1"))
        .and(body_json(serde_json::json!({ "to": "landlord-3", "body": "Heater is broken" })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_token(token));
    let client = client_for(&server, store, Arc::default());

    let request = ApiRequest::post("/api/messages")
        .json(&serde_json::json!({ "to": "landlord-3", "body": "Heater is broken" }))
        .unwrap()
        .header("X-Idempotency-Key", "msg-1");

    let response = client.request(request).await.unwrap();
    assert_eq!(response.status.as_u16(), 201);
}

#[tokio::test]
async fn test_login_url_resolves_against_base() {
    let store = Arc::new(MemoryCredentialStore::new());
    let client = ApiClient::new(ClientConfig::new("https://app.rentwise.test/"), store).unwrap();
    assert_eq!(client.login_url(), "https://app.rentwise.test/login");

    let store = Arc::new(MemoryCredentialStore::new());
    let config = ClientConfig::new("https://api.rentwise.test").with_login_url("https://app.rentwise.test/sign-in");
    let client = ApiClient::new(config, store).unwrap();
    assert_eq!(client.login_url(), "https://app.rentwise.test/sign-in");
}

/// Base URL of a local port nothing listens on
fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}
