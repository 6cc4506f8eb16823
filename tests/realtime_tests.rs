//! End-to-end tests for the realtime WebSocket endpoint
//!
//! These run a real listener so the upgrade handshake goes over TCP.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use collabdrive_server::router;
use common::{eventually, spawn_app, TestApp};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(app: &TestApp) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = router(app.state.clone());
    tokio::spawn(async move {
        axum::serve(listener, service).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, token: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws?token={token}"))
        .await
        .unwrap();
    client
}

async fn send(client: &mut Client, frame: Value) {
    client
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Read frames until one of the given type arrives, skipping the rest
async fn recv_type(client: &mut Client, frame_type: &str) -> Value {
    let wait = async {
        while let Some(message) = client.next().await {
            if let Message::Text(text) = message.unwrap() {
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                if frame["type"] == frame_type {
                    return frame;
                }
            }
        }
        panic!("socket closed while waiting for {frame_type}");
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {frame_type}"))
}

/// Every frame received up to and including the first of the given type
async fn frames_until(client: &mut Client, frame_type: &str) -> Vec<Value> {
    let wait = async {
        let mut frames = Vec::new();
        while let Some(message) = client.next().await {
            if let Message::Text(text) = message.unwrap() {
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                let done = frame["type"] == frame_type;
                frames.push(frame);
                if done {
                    return frames;
                }
            }
        }
        panic!("socket closed while waiting for {frame_type}");
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {frame_type}"))
}

// =============================================================================
// Handshake Tests
// =============================================================================

#[tokio::test]
async fn test_upgrade_requires_valid_token() {
    let app = spawn_app().await;
    let addr = serve(&app).await;

    let result = connect_async(format!("ws://{addr}/ws?token=bogus")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_ping_pong() {
    let app = spawn_app().await;
    let alice = app.register("Alice").await;
    let addr = serve(&app).await;

    let mut client = connect(addr, &alice.token).await;
    send(&mut client, json!({ "type": "ping" })).await;
    let frame = recv_type(&mut client, "pong").await;
    assert_eq!(frame, json!({ "type": "pong" }));

    // Malformed frames produce an error but keep the connection open
    client.send(Message::Text("not json".into())).await.unwrap();
    recv_type(&mut client, "error").await;
    send(&mut client, json!({ "type": "ping" })).await;
    recv_type(&mut client, "pong").await;
}

// =============================================================================
// Collaborative Editing Tests
// =============================================================================

#[tokio::test]
async fn test_document_updates_relay_and_persist() {
    let app = spawn_app().await;
    let alice = app.register("Alice").await;
    let bob = app.register("Bob").await;
    let addr = serve(&app).await;

    let (_, document) = app
        .post(
            "/api/documents",
            &alice.token,
            json!({ "title": "Live", "content": "start" }),
        )
        .await;
    let document_id = document["id"].as_str().unwrap().to_string();
    app.post(
        "/api/shares",
        &alice.token,
        json!({ "resourceType": "document", "resourceId": document_id, "email": bob.email, "permission": "edit" }),
    )
    .await;

    let mut alice_ws = connect(addr, &alice.token).await;
    let mut bob_ws = connect(addr, &bob.token).await;

    send(&mut alice_ws, json!({ "type": "join_document", "documentId": document_id })).await;
    let state = recv_type(&mut alice_ws, "document_state").await;
    assert_eq!(state["title"], "Live");
    assert_eq!(state["content"], "start");
    assert_eq!(state["canEdit"], true);
    assert_eq!(state["updates"], json!([]));

    send(&mut bob_ws, json!({ "type": "join_document", "documentId": document_id })).await;
    recv_type(&mut bob_ws, "document_state").await;

    send(
        &mut alice_ws,
        json!({ "type": "document_update", "documentId": document_id, "update": "AQID", "content": "start!" }),
    )
    .await;

    let relayed = recv_type(&mut bob_ws, "document_update").await;
    assert_eq!(relayed["update"], "AQID");
    assert_eq!(relayed["userId"], alice.id.as_str());

    // Flushed after the debounce window
    let updates_uri = format!("/api/documents/{document_id}/updates");
    eventually(|| async {
        let (status, updates) = app.get(&updates_uri, &alice.token).await;
        status == StatusCode::OK && updates.as_array().map(Vec::len) == Some(1)
    })
    .await;

    let (_, saved) = app
        .get(&format!("/api/documents/{document_id}"), &alice.token)
        .await;
    assert_eq!(saved["content"], "start!");

    // A late joiner gets the persisted delta
    send(&mut bob_ws, json!({ "type": "leave_document", "documentId": document_id })).await;
    send(&mut bob_ws, json!({ "type": "join_document", "documentId": document_id })).await;
    let state = recv_type(&mut bob_ws, "document_state").await;
    assert!(state["updates"]
        .as_array()
        .unwrap()
        .contains(&json!("AQID")));
}

#[tokio::test]
async fn test_view_only_collaborator_cannot_edit() {
    let app = spawn_app().await;
    let alice = app.register("Alice").await;
    let bob = app.register("Bob").await;
    let carol = app.register("Carol").await;
    let addr = serve(&app).await;

    let (_, document) = app
        .post("/api/documents", &alice.token, json!({ "title": "Read me" }))
        .await;
    let document_id = document["id"].as_str().unwrap().to_string();
    app.post(
        "/api/shares",
        &alice.token,
        json!({ "resourceType": "document", "resourceId": document_id, "email": bob.email, "permission": "view" }),
    )
    .await;

    let mut bob_ws = connect(addr, &bob.token).await;
    send(&mut bob_ws, json!({ "type": "join_document", "documentId": document_id })).await;
    let state = recv_type(&mut bob_ws, "document_state").await;
    assert_eq!(state["canEdit"], false);

    send(
        &mut bob_ws,
        json!({ "type": "document_update", "documentId": document_id, "update": "AQID" }),
    )
    .await;
    recv_type(&mut bob_ws, "error").await;

    // Users without access cannot join at all
    let mut carol_ws = connect(addr, &carol.token).await;
    send(&mut carol_ws, json!({ "type": "join_document", "documentId": document_id })).await;
    let error = recv_type(&mut carol_ws, "error").await;
    assert!(error["message"].as_str().unwrap().contains("not found"));

    app.state.hub.flush().await;
    let (_, updates) = app
        .get(&format!("/api/documents/{document_id}/updates"), &alice.token)
        .await;
    assert!(updates.as_array().unwrap().is_empty());
}

// =============================================================================
// Team Chat Tests
// =============================================================================

#[tokio::test]
async fn test_chat_over_socket_reaches_team() {
    let app = spawn_app().await;
    let alice = app.register("Alice").await;
    let bob = app.register("Bob").await;
    let team_id = app.team_with(&alice, &[&bob]).await;
    let addr = serve(&app).await;

    let mut alice_ws = connect(addr, &alice.token).await;
    let mut bob_ws = connect(addr, &bob.token).await;
    send(&mut alice_ws, json!({ "type": "join_team", "teamId": team_id })).await;
    recv_type(&mut alice_ws, "team_presence").await;
    send(&mut bob_ws, json!({ "type": "join_team", "teamId": team_id })).await;
    let presence = recv_type(&mut bob_ws, "team_presence").await;
    assert_eq!(presence["users"].as_array().unwrap().len(), 2);

    send(
        &mut bob_ws,
        json!({ "type": "chat_message", "teamId": team_id, "content": "hello team" }),
    )
    .await;
    let frame = recv_type(&mut alice_ws, "chat_message").await;
    assert_eq!(frame["message"]["content"], "hello team");
    assert_eq!(frame["message"]["senderName"], "Bob");

    // Stored like any other message
    let (_, history) = app
        .get(&format!("/api/teams/{team_id}/messages"), &alice.token)
        .await;
    assert_eq!(history[0]["content"], "hello team");
}

#[tokio::test]
async fn test_notifications_are_pushed_live() {
    let app = spawn_app().await;
    let alice = app.register("Alice").await;
    let bob = app.register("Bob").await;
    let addr = serve(&app).await;

    let mut bob_ws = connect(addr, &bob.token).await;
    send(&mut bob_ws, json!({ "type": "ping" })).await;
    recv_type(&mut bob_ws, "pong").await;

    app.team_with(&alice, &[&bob]).await;

    let frame = recv_type(&mut bob_ws, "notification").await;
    assert_eq!(frame["notification"]["kind"], "team_member_added");
    assert_eq!(frame["notification"]["userId"], bob.id.as_str());
}

#[tokio::test]
async fn test_removed_member_stops_receiving_team_chat() {
    let app = spawn_app().await;
    let alice = app.register("Alice").await;
    let bob = app.register("Bob").await;
    let team_id = app.team_with(&alice, &[&bob]).await;
    let addr = serve(&app).await;

    let mut alice_ws = connect(addr, &alice.token).await;
    let mut bob_ws = connect(addr, &bob.token).await;
    send(&mut alice_ws, json!({ "type": "join_team", "teamId": team_id })).await;
    recv_type(&mut alice_ws, "team_presence").await;
    send(&mut bob_ws, json!({ "type": "join_team", "teamId": team_id })).await;
    recv_type(&mut bob_ws, "team_presence").await;

    let (status, _) = app
        .delete(&format!("/api/teams/{team_id}/members/{}", bob.id), &alice.token)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .post(
            &format!("/api/teams/{team_id}/messages"),
            &alice.token,
            json!({ "content": "members only" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    recv_type(&mut alice_ws, "chat_message").await;

    // Anything Bob was still sent would arrive before this pong
    send(&mut bob_ws, json!({ "type": "ping" })).await;
    let frames = frames_until(&mut bob_ws, "pong").await;
    assert!(frames.iter().all(|f| f["type"] != "chat_message"));
    assert!(frames
        .iter()
        .any(|f| f["type"] == "error" && f["message"].as_str().unwrap().contains("no longer")));
}
