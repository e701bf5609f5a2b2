// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end dispatch tests against a local capture server.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Router;

use rbg_repos::events::{marshal_payload, PushPayload, PushPayloadCommit, PushPayloadCommitTarget};
use rbg_webhooks::{invoke_all_hooks, Webhook, WebhookStore};

#[derive(Debug, Clone)]
struct CapturedRequest {
    headers: HeaderMap,
    body: Vec<u8>,
}

type Captured = Arc<Mutex<Vec<CapturedRequest>>>;

async fn capture(State(captured): State<Captured>, headers: HeaderMap, body: axum::body::Bytes) {
    captured.lock().unwrap().push(CapturedRequest {
        headers,
        body: body.to_vec(),
    });
}

/// Start a capture server on an ephemeral port.
async fn start_server() -> (SocketAddr, Captured) {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new()
        .route("/hook", post(capture))
        .with_state(captured.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, captured)
}

fn test_payload() -> PushPayload {
    PushPayload {
        repository: "repo".to_string(),
        commits: vec![PushPayloadCommit {
            id: "abababab".to_string(),
            message: "Commit message".to_string(),
            target: PushPayloadCommitTarget {
                branch: "master".to_string(),
                bookmarks: None,
                tags: None,
            },
        }],
    }
}

fn test_hook(id: &str, url: String, enabled: bool) -> Webhook {
    Webhook {
        id: id.to_string(),
        url,
        secret: "a".repeat(20),
        enabled,
        events: vec!["push".to_string()],
        repos: vec!["repo".to_string()],
    }
}

#[tokio::test]
async fn test_dispatch_signs_and_posts() {
    let (addr, captured) = start_server().await;

    let mut store = WebhookStore::new();
    let hook = test_hook("hook-1", format!("http://{}/hook", addr), true);
    store.insert(hook.clone());

    let payload = test_payload();
    let client = reqwest::Client::new();

    invoke_all_hooks(&client, &store, "push", "repo", &payload)
        .await
        .unwrap();

    let requests = captured.lock().unwrap();
    assert_eq!(requests.len(), 1);

    let request = &requests[0];
    let raw = marshal_payload(&payload).unwrap();

    assert_eq!(request.body, raw);
    assert_eq!(request.headers["x-rbg-event"], "push");
    assert_eq!(
        request.headers["x-rbg-signature"],
        hook.sign_payload(&raw).as_str()
    );
    assert_eq!(request.headers["content-type"], "application/json");
}

#[tokio::test]
async fn test_dispatch_skips_disabled_hooks() {
    let (addr, captured) = start_server().await;

    let mut store = WebhookStore::new();
    store.insert(test_hook("enabled", format!("http://{}/hook", addr), true));
    store.insert(test_hook("disabled", format!("http://{}/hook", addr), false));

    let client = reqwest::Client::new();

    invoke_all_hooks(&client, &store, "push", "repo", &test_payload())
        .await
        .unwrap();

    assert_eq!(captured.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_dispatch_rejects_unknown_event() {
    let store = WebhookStore::new();
    let client = reqwest::Client::new();

    let err = invoke_all_hooks(&client, &store, "not-an-event", "repo", &test_payload())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Unknown event type \"not-an-event\"");
}

#[tokio::test]
async fn test_dispatch_continues_after_failure() {
    let (addr, captured) = start_server().await;

    let mut store = WebhookStore::new();

    // An unroutable address; delivery fails but must not stop the rest.
    store.insert(test_hook("bad", "http://127.0.0.1:1/hook".to_string(), true));
    store.insert(test_hook("good", format!("http://{}/hook", addr), true));

    let client = reqwest::Client::new();

    let err = invoke_all_hooks(&client, &store, "push", "repo", &test_payload())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "1 errors occurred while processing webhooks");
    assert_eq!(captured.lock().unwrap().len(), 1);
}
