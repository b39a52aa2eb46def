//! Request-level tests for the HTTP surface, driven through the handler

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use hyper::{HeaderMap, Method, Request, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use trailgraph_client::Credentials;
use trailgraph_core::auth::{IdentityToken, SigningKey, SigningSecret, SIGNATURE_HEADER};
use trailgraph_core::*;
use trailgraph_engine::{EdgeKind, NodeKey, StorageEngine};
use trailgraph_server::{handle_request, AppState, FlushWorker, ServerConfig};

const BASE: &str = "http://localhost";

struct Harness {
    state: AppState,
    key: SigningKey,
    _temp: TempDir,
}

impl Harness {
    fn new() -> Self {
        let (engine, temp) = StorageEngine::temp().unwrap();
        let key = SigningKey::generate();
        let pem = key.to_pem();
        let state = AppState::new(
            &engine,
            SigningKey::from_pem(&pem).unwrap(),
            key.verifying_key(),
            ServerConfig::default(),
        )
        .unwrap();
        Harness {
            state,
            key,
            _temp: temp,
        }
    }

    async fn call(&self, request: Request<Full<Bytes>>) -> (StatusCode, HeaderMap, Value) {
        let response = handle_request(request, self.state.clone()).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    async fn json(
        &self,
        method: Method,
        path: &str,
        body: Value,
        cookie: Option<&str>,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(format!("{}{}", BASE, path));
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        let request = builder
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap();
        self.call(request).await
    }

    /// Register and log in; returns the credentials and the session cookie pair
    async fn login(&self, email: &str, password: &str) -> (Credentials, String) {
        let (status, _, _) = self
            .json(
                Method::POST,
                "/register",
                json!({"email": email, "password": password, "full_name": "Test User"}),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, headers, body) = self
            .json(
                Method::POST,
                "/login",
                json!({"email": email, "password": password}),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let set_cookie = headers[SET_COOKIE].to_str().unwrap();
        let cookie = set_cookie.split(';').next().unwrap().to_string();
        (serde_json::from_value(body).unwrap(), cookie)
    }
}

fn scenario_event() -> EventPayload {
    EventPayload {
        post_urn: "urn:1".to_string(),
        action: "comment_generated".to_string(),
        author_slug: "x".to_string(),
        ..Default::default()
    }
}

fn assert_unauthorized(status: StatusCode, body: &Value) {
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, &json!({"error": "Unauthorized"}));
}

#[tokio::test]
async fn health_reports_service() {
    let h = Harness::new();
    let request = Request::get(format!("{}/health", BASE))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (status, _, body) = h.call(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "trailgraph");
}

#[tokio::test]
async fn login_event_flush_creates_one_action_edge() {
    let h = Harness::new();
    let (creds, _) = h.login("a@b.com", "pw").await;

    let request = creds.event_request(BASE, &scenario_event()).unwrap();
    let (status, _, body) = h.call(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));

    let report = FlushWorker::new(&h.state).flush().await.unwrap();
    assert_eq!(report.merged, 1);

    let user = h.state.users.find_by_email("a@b.com").unwrap().unwrap();
    let edges = h
        .state
        .graph
        .edges_between(
            EdgeKind::Action,
            &NodeKey::User(user.id),
            &NodeKey::post("urn:1").unwrap(),
        )
        .unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].edge_type, "comment_generated");
    assert_eq!(h.state.graph.edge_count(EdgeKind::Action).unwrap(), 1);
}

#[tokio::test]
async fn event_signed_with_other_secret_is_rejected() {
    let h = Harness::new();
    let (creds, _) = h.login("a@b.com", "pw").await;
    let forged = Credentials::new(creds.token.clone(), SigningSecret::generate());

    let (status, _, body) = h
        .call(forged.event_request(BASE, &scenario_event()).unwrap())
        .await;
    assert_unauthorized(status, &body);
    assert!(h.state.buffer.is_empty().unwrap());
}

#[tokio::test]
async fn identical_body_is_accepted_twice() {
    let h = Harness::new();
    let (creds, _) = h.login("a@b.com", "pw").await;

    for _ in 0..2 {
        let (status, _, _) = h
            .call(creds.event_request(BASE, &scenario_event()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(h.state.buffer.len().unwrap(), 2);
}

#[tokio::test]
async fn body_altered_after_signing_is_rejected() {
    let h = Harness::new();
    let (creds, _) = h.login("a@b.com", "pw").await;

    let body = serde_json::to_vec(&scenario_event()).unwrap();
    let signature = creds.sign(&body);
    let mut altered = body.clone();
    altered.push(b' ');

    let request = Request::post(format!("{}/events", BASE))
        .header(AUTHORIZATION, format!("Bearer {}", creds.token))
        .header(SIGNATURE_HEADER, signature)
        .body(Full::new(Bytes::from(altered)))
        .unwrap();
    let (status, _, body) = h.call(request).await;
    assert_unauthorized(status, &body);
}

#[tokio::test]
async fn client_supplied_user_id_is_overridden() {
    let h = Harness::new();
    let (creds, _) = h.login("a@b.com", "pw").await;

    let body = br#"{"user_id":"999","post_urn":"urn:1","action":"like","author_slug":"x"}"#.to_vec();
    let (status, _, _) = h
        .call(creds.signed_request(&format!("{}/events", BASE), body).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);

    let drained = h.state.buffer.drain(None).unwrap();
    let record = drained[0].decode().unwrap();
    let user = h.state.users.find_by_email("a@b.com").unwrap().unwrap();
    assert_eq!(record.user_id(), user.id);
}

#[tokio::test]
async fn event_missing_required_fields_is_rejected() {
    let h = Harness::new();
    let (creds, _) = h.login("a@b.com", "pw").await;

    let mut event = scenario_event();
    event.author_slug.clear();
    let (status, _, body) = h.call(creds.event_request(BASE, &event).unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("author_slug"));
    assert!(h.state.buffer.is_empty().unwrap());
}

#[tokio::test]
async fn expired_and_foreign_tokens_are_rejected() {
    let h = Harness::new();
    let (creds, _) = h.login("a@b.com", "pw").await;
    let user = h.state.users.find_by_email("a@b.com").unwrap().unwrap();

    let expired = IdentityToken::create(&user.identity(), &h.key, Duration::ZERO).unwrap();
    let stale = Credentials::new(expired.token(), creds.signing_secret.clone());
    let (status, _, body) = h
        .call(stale.event_request(BASE, &scenario_event()).unwrap())
        .await;
    assert_unauthorized(status, &body);

    let other_key = SigningKey::generate();
    let foreign = IdentityToken::create(&user.identity(), &other_key, Duration::from_secs(60)).unwrap();
    let forged = Credentials::new(foreign.token(), creds.signing_secret.clone());
    let (status, _, body) = h
        .call(forged.event_request(BASE, &scenario_event()).unwrap())
        .await;
    assert_unauthorized(status, &body);
}

#[tokio::test]
async fn ingestion_ignores_session_cookie() {
    let h = Harness::new();
    let (creds, cookie) = h.login("a@b.com", "pw").await;

    let body = serde_json::to_vec(&scenario_event()).unwrap();
    let request = Request::post(format!("{}/events", BASE))
        .header(COOKIE, cookie)
        .header(SIGNATURE_HEADER, creds.sign(&body))
        .body(Full::new(Bytes::from(body)))
        .unwrap();
    let (status, _, body) = h.call(request).await;
    assert_unauthorized(status, &body);
}

#[tokio::test]
async fn me_requires_session_cookie() {
    let h = Harness::new();
    let (creds, cookie) = h.login("Ada@Example.com", "pw").await;

    let (status, _, body) = h.json(Method::GET, "/me", Value::Null, Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "ada@example.com");
    assert_eq!(body["full_name"], "Test User");
    assert_eq!(body["tier"], "free");
    assert_eq!(body["auth_provider"], "email");

    let request = Request::get(format!("{}/me", BASE))
        .header(AUTHORIZATION, format!("Bearer {}", creds.token))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (status, _, body) = h.call(request).await;
    assert_unauthorized(status, &body);
}

#[tokio::test]
async fn whoami_accepts_either_credential() {
    let h = Harness::new();
    let (creds, cookie) = h.login("a@b.com", "pw").await;

    let (status, _, body) = h.json(Method::GET, "/whoami", Value::Null, Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["via"], "session");

    let request = Request::get(format!("{}/whoami", BASE))
        .header(AUTHORIZATION, format!("Bearer {}", creds.token))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (status, _, body) = h.call(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["via"], "bearer");
    assert_eq!(body["tier"], "free");

    let (status, _, body) = h.json(Method::GET, "/whoami", Value::Null, None).await;
    assert_unauthorized(status, &body);
}

#[tokio::test]
async fn logout_ends_session() {
    let h = Harness::new();
    let (_, cookie) = h.login("a@b.com", "pw").await;

    let (status, headers, body) = h.json(Method::POST, "/logout", Value::Null, Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logged out");
    assert!(headers[SET_COOKIE].to_str().unwrap().contains("Max-Age=0"));

    let (status, _, body) = h.json(Method::GET, "/me", Value::Null, Some(&cookie)).await;
    assert_unauthorized(status, &body);

    // Without a cookie logout still succeeds
    let (status, _, _) = h.json(Method::POST, "/logout", Value::Null, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn logout_locks_out_extension_credentials() {
    let h = Harness::new();
    let (creds, cookie) = h.login("a@b.com", "pw").await;

    let (status, _, _) = h.call(creds.event_request(BASE, &scenario_event()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = h.json(Method::POST, "/logout", Value::Null, Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);

    // The identity token is still unexpired, but its signing secret is gone
    let (status, _, body) = h.call(creds.event_request(BASE, &scenario_event()).unwrap()).await;
    assert_unauthorized(status, &body);
    let batch = [Connection { slug: "s".into(), ..Default::default() }];
    let (status, _, body) = h.call(creds.connections_request(BASE, &batch).unwrap()).await;
    assert_unauthorized(status, &body);
    assert_eq!(h.state.buffer.len().unwrap(), 1);

    // Logging in again restores ingestion
    let (status, _, body) = h
        .json(Method::POST, "/login", json!({"email": "a@b.com", "password": "pw"}), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let fresh: Credentials = serde_json::from_value(body).unwrap();
    let (status, _, _) = h.call(fresh.event_request(BASE, &scenario_event()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn preflight_allows_extension_headers() {
    let h = Harness::new();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri(format!("{}/events", BASE))
        .header("origin", "chrome-extension://abc")
        .header("access-control-request-method", "POST")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = handle_request(request, h.state.clone()).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let headers = response.headers();
    assert_eq!(headers["access-control-allow-origin"], "*");
    let allowed = headers["access-control-allow-headers"]
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(allowed.contains("authorization"));
    assert!(allowed.contains(SIGNATURE_HEADER));
    assert!(headers["access-control-allow-methods"].to_str().unwrap().contains("POST"));

    // Ordinary responses carry the origin header too
    let (_, headers, _) = h.json(Method::GET, "/health", Value::Null, None).await;
    assert_eq!(headers["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn login_failures_look_alike() {
    let h = Harness::new();
    h.login("a@b.com", "pw").await;

    let (status, _, wrong_password) = h
        .json(Method::POST, "/login", json!({"email": "a@b.com", "password": "nope"}), None)
        .await;
    assert_unauthorized(status, &wrong_password);

    let (status, _, unknown) = h
        .json(Method::POST, "/login", json!({"email": "z@b.com", "password": "pw"}), None)
        .await;
    assert_unauthorized(status, &unknown);
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let h = Harness::new();
    h.login("a@b.com", "pw").await;

    let (status, _, _) = h
        .json(Method::POST, "/register", json!({"email": "A@b.com", "password": "x"}), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn connection_batch_limits_and_skips() {
    let h = Harness::new();
    let (creds, _) = h.login("a@b.com", "pw").await;

    let (status, _, body) = h.call(creds.connections_request(BASE, &[]).unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "connections array is empty");

    let too_many = vec![Connection { slug: "s".into(), ..Default::default() }; 201];
    let (status, _, body) = h.call(creds.connections_request(BASE, &too_many).unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "max 200 connections per batch");

    let mixed = vec![
        Connection {
            name: "Ada".into(),
            slug: "ada".into(),
            headline: "Engineer".into(),
            connected_at: "2024-01-02".into(),
        },
        Connection { name: "No Slug".into(), ..Default::default() },
    ];
    let (status, _, body) = h.call(creds.connections_request(BASE, &mixed).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "queued": 1, "skipped": 1}));

    FlushWorker::new(&h.state).flush().await.unwrap();
    assert_eq!(h.state.graph.edge_count(EdgeKind::ConnectedTo).unwrap(), 1);
    assert_eq!(h.state.graph.person("ada").unwrap().unwrap().headline, "Engineer");
}

#[tokio::test]
async fn flushing_same_event_twice_is_idempotent() {
    let h = Harness::new();
    let (creds, _) = h.login("a@b.com", "pw").await;
    let worker = FlushWorker::new(&h.state);

    h.call(creds.event_request(BASE, &scenario_event()).unwrap()).await;
    worker.flush().await.unwrap();
    let once = h.state.graph.stats().unwrap();

    h.call(creds.event_request(BASE, &scenario_event()).unwrap()).await;
    worker.flush().await.unwrap();
    assert_eq!(h.state.graph.stats().unwrap(), once);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let h = Harness::new();
    let (status, _, body) = h.json(Method::GET, "/nope", Value::Null, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not found");
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let h = Harness::new();
    let (creds, _) = h.login("a@b.com", "pw").await;

    let mut event = scenario_event();
    event.post_text = "x".repeat(MAX_INGEST_BODY_BYTES);
    let (status, _, _) = h.call(creds.event_request(BASE, &event).unwrap()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.state.buffer.is_empty().unwrap());
}
