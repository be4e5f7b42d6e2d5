//! End-to-end tests over a bound listener, with mockito standing in for the
//! Slack API.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use {
    hmac::{Hmac, Mac},
    sha2::Sha256,
    sqlx::sqlite::SqlitePoolOptions,
};

use {
    slackproxy_gateway::{AppState, build_app},
    slackproxy_service::{ChannelService, EventIngestor},
    slackproxy_store::{ChannelStore, NewChannel, SyncLockStore},
    slackproxy_upstream::SlackClient,
};

const SIGNING_SECRET: &str = "signing-secret";

struct TestApp {
    base_url: String,
    slack: mockito::ServerGuard,
    store: ChannelStore,
    locks: SyncLockStore,
    http: reqwest::Client,
}

async fn spawn_app() -> TestApp {
    let slack = mockito::Server::new_async().await;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    slackproxy_store::init(&pool).await.unwrap();
    let store = ChannelStore::new(pool.clone());
    let locks = SyncLockStore::new(pool, Duration::from_secs(600));

    let upstream = Arc::new(SlackClient::new(slack.url(), 5, Duration::from_secs(0)));
    let service = Arc::new(ChannelService::new(
        upstream,
        store.clone(),
        locks.clone(),
    ));
    let state = AppState {
        service,
        ingestor: EventIngestor::new(store.clone()),
        signing_secret: SIGNING_SECRET.into(),
        signature_tolerance: Duration::from_secs(300),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_app(state)).await.unwrap();
    });

    TestApp {
        base_url: format!("http://{addr}"),
        slack,
        store,
        locks,
        http: reqwest::Client::new(),
    }
}

impl TestApp {
    async fn mock_auth_test(&mut self) -> mockito::Mock {
        self.slack
            .mock("GET", "/auth.test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true, "team_id": "T123"}"#)
            .expect_at_least(1)
            .create_async()
            .await
    }

    async fn get_channel(&self, name: &str) -> reqwest::Response {
        self.http
            .get(format!("{}/channels/{name}", self.base_url))
            .bearer_auth("xoxb-test")
            .send()
            .await
            .unwrap()
    }

    async fn post_channel(&self, name: &str) -> reqwest::Response {
        self.http
            .post(format!("{}/channels", self.base_url))
            .bearer_auth("xoxb-test")
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .unwrap()
    }

    async fn post_event(&self, payload: &serde_json::Value, secret: &str, ts: i64) -> reqwest::Response {
        let body = payload.to_string();
        self.http
            .post(format!("{}/slack/events", self.base_url))
            .header("X-Slack-Request-Timestamp", ts.to_string())
            .header("X-Slack-Signature", sign(secret, ts, &body))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap()
    }
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn sign(secret: &str, ts: i64, body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("v0:{ts}:{body}").as_bytes());
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

fn channel(id: &str, name: &str) -> NewChannel {
    NewChannel {
        channel_id: id.into(),
        name: name.into(),
        is_archived: false,
    }
}

#[tokio::test]
async fn health_endpoint_responds() {
    let app = spawn_app().await;
    let resp = app
        .http
        .get(format!("{}/health", app.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn read_miss_returns_not_found_from_cache() {
    let mut app = spawn_app().await;
    app.mock_auth_test().await;

    let resp = app.get_channel("unknown").await;

    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "");
    assert_eq!(body["name"], "unknown");
    assert_eq!(body["source"], "db");
    assert_eq!(body["exists"], false);
    assert_eq!(body["sync_status"], serde_json::Value::Null);
}

#[tokio::test]
async fn read_hit_serves_cached_record_with_normalization() {
    let mut app = spawn_app().await;
    app.mock_auth_test().await;
    app.store.upsert("T123", channel("C1", "general")).await.unwrap();

    let resp = app.get_channel("%20General%20").await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "C1");
    assert_eq!(body["name"], "general");
    assert_eq!(body["source"], "db");
    assert_eq!(body["exists"], true);
}

#[tokio::test]
async fn missing_authorization_header_is_rejected() {
    let app = spawn_app().await;

    let resp = app
        .http
        .get(format!("{}/channels/general", app.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["detail"], "Missing Authorization header");
}

#[tokio::test]
async fn create_success_returns_upstream_channel() {
    let mut app = spawn_app().await;
    app.mock_auth_test().await;
    let _create = app
        .slack
        .mock("POST", "/conversations.create")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok": true, "channel": {"id": "C99", "name": "engineering"}}"#)
        .create_async()
        .await;

    let resp = app.post_channel("Engineering").await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "C99");
    assert_eq!(body["name"], "engineering");
    assert_eq!(body["source"], "slack");
    assert_eq!(body["sync_status"], serde_json::Value::Null);

    // The created channel is now served from the cache.
    let read = app.get_channel("engineering").await;
    assert_eq!(read.status(), 200);
}

#[tokio::test]
async fn create_conflict_queues_resync_and_cache_catches_up() {
    let mut app = spawn_app().await;
    app.mock_auth_test().await;
    let _create = app
        .slack
        .mock("POST", "/conversations.create")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok": false, "error": "name_taken"}"#)
        .create_async()
        .await;
    let list = app
        .slack
        .mock("GET", "/conversations.list")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"ok": true,
                "channels": [{"id": "C1", "name": "general"}, {"id": "C2", "name": "random"}],
                "response_metadata": {"next_cursor": ""}}"#,
        )
        .create_async()
        .await;

    let resp = app.post_channel("general").await;

    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["exists"], true);
    assert_eq!(body["sync_status"], "sync_queued");

    // The detached resync populates the cache and releases the lock.
    let mut served = false;
    for _ in 0..200 {
        if app.get_channel("general").await.status() == 200 {
            served = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(served, "cache never caught up after resync");
    list.assert_async().await;
}

#[tokio::test]
async fn concurrent_conflict_does_not_schedule_second_resync() {
    let mut app = spawn_app().await;
    app.mock_auth_test().await;
    let _create = app
        .slack
        .mock("POST", "/conversations.create")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok": false, "error": "name_taken"}"#)
        .create_async()
        .await;
    let list = app
        .slack
        .mock("GET", "/conversations.list")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    // A resync is already in flight for this workspace.
    assert!(app.locks.try_acquire("T123").await.unwrap());

    let resp = app.post_channel("general").await;

    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["source"], "sync_in_progress");
    assert_eq!(body["sync_status"], "sync_in_progress");

    tokio::time::sleep(Duration::from_millis(50)).await;
    list.assert_async().await;
}

#[tokio::test]
async fn create_with_invalid_name_is_rejected() {
    let app = spawn_app().await;

    assert_eq!(app.post_channel("   ").await.status(), 400);
    assert_eq!(app.post_channel(&"a".repeat(81)).await.status(), 400);
}

#[tokio::test]
async fn name_length_limit_counts_characters_not_bytes() {
    let mut app = spawn_app().await;
    app.mock_auth_test().await;
    // 30 characters, 90 bytes.
    let name = "チ".repeat(30);
    let _create = app
        .slack
        .mock("POST", "/conversations.create")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"ok": true, "channel": {{"id": "C50", "name": "{name}"}}}}"#
        ))
        .create_async()
        .await;

    let resp = app.post_channel(&name).await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "C50");
}

#[tokio::test]
async fn upstream_failure_surfaces_as_bad_gateway() {
    let mut app = spawn_app().await;
    app.mock_auth_test().await;
    let _create = app
        .slack
        .mock("POST", "/conversations.create")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok": false, "error": "internal_error"}"#)
        .create_async()
        .await;

    let resp = app.post_channel("general").await;

    assert_eq!(resp.status(), 502);
    let body: serde_json::Value = resp.json().await.unwrap();
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.contains("internal_error"), "detail was {detail:?}");
}

#[tokio::test]
async fn url_verification_echoes_challenge() {
    let app = spawn_app().await;

    let payload = serde_json::json!({"type": "url_verification", "challenge": "abc123"});
    let resp = app.post_event(&payload, SIGNING_SECRET, now()).await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["challenge"], "abc123");
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let app = spawn_app().await;

    let payload = serde_json::json!({
        "type": "event_callback",
        "team_id": "T123",
        "event": {"type": "channel_created", "channel": {"id": "C1", "name": "x"}}
    });
    let resp = app.post_event(&payload, "wrong-secret", now()).await;

    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["detail"], "Invalid Slack request signature");
    // Nothing was written.
    assert!(app.store.get_by_id("T123", "C1").await.unwrap().is_none());
}

#[tokio::test]
async fn webhook_with_stale_timestamp_is_rejected() {
    let app = spawn_app().await;

    let payload = serde_json::json!({
        "type": "event_callback",
        "team_id": "T123",
        "event": {"type": "channel_created", "channel": {"id": "C1", "name": "x"}}
    });
    let resp = app.post_event(&payload, SIGNING_SECRET, now() - 301).await;

    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn channel_created_event_populates_cache() {
    let app = spawn_app().await;

    let payload = serde_json::json!({
        "type": "event_callback",
        "team_id": "T123",
        "event": {
            "type": "channel_created",
            "channel": {"id": "C100", "name": "engineering", "is_archived": false}
        }
    });
    let resp = app.post_event(&payload, SIGNING_SECRET, now()).await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);

    let row = app.store.get_by_id("T123", "C100").await.unwrap().unwrap();
    assert_eq!(row.name, "engineering");
    assert!(!row.is_archived);
}

#[tokio::test]
async fn channel_deleted_event_marks_archived() {
    let app = spawn_app().await;
    app.store
        .upsert("T123", channel("C100", "engineering"))
        .await
        .unwrap();

    let payload = serde_json::json!({
        "type": "event_callback",
        "team_id": "T123",
        "event": {"type": "channel_deleted", "channel": "C100"}
    });
    let resp = app.post_event(&payload, SIGNING_SECRET, now()).await;

    assert_eq!(resp.status(), 200);
    let row = app.store.get_by_id("T123", "C100").await.unwrap().unwrap();
    assert!(row.is_archived);
}

#[tokio::test]
async fn unrecognized_event_kind_is_acknowledged() {
    let app = spawn_app().await;

    let payload = serde_json::json!({
        "type": "event_callback",
        "team_id": "T123",
        "event": {"type": "member_joined_channel", "user": "U1"}
    });
    let resp = app.post_event(&payload, SIGNING_SECRET, now()).await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
}
