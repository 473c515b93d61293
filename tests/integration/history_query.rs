//! Integration tests for `GET /messages`.
//!
//! Seeds the store through real WebSocket sessions, then reads history back
//! over plain HTTP/1.1.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use msgrelay_proto::{Message, codec};
use msgrelay_server::relay::{self, RelayState};
use msgrelay_server::store::{MemoryStore, MessageStore, SqliteStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite;

/// Start the relay in-process over the given store.
async fn start_relay<S: MessageStore>(store: S) -> (std::net::SocketAddr, Arc<RelayState<S>>) {
    let state = Arc::new(RelayState::new(store));
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay server");
    (addr, state)
}

/// Issue a GET and return `(status, content-type, body)`.
async fn http_get(addr: std::net::SocketAddr, path_and_query: &str) -> (u16, String, String) {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {path_and_query} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .expect("http response timed out")
        .unwrap();
    let raw = String::from_utf8(raw).unwrap();

    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap();
    let content_type = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-type")
                .then(|| value.trim().to_string())
        })
        .unwrap_or_default();
    (status, content_type, body.to_string())
}

async fn history(addr: std::net::SocketAddr, query: &str) -> Vec<Message> {
    let (status, content_type, body) = http_get(addr, &format!("/messages?{query}")).await;
    assert_eq!(status, 200, "body: {body}");
    assert_eq!(content_type, "application/json");
    serde_json::from_str(&body).unwrap()
}

/// Send `n` messages for `receiver` through one session and wait for them
/// to be persisted.
async fn seed_via_session(addr: std::net::SocketAddr, receiver: &str, n: usize) {
    let url = format!("ws://{addr}/ws?receiver_id={receiver}");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    for i in 0..n {
        let msg = Message::now("B", receiver, format!("m{i}"));
        let text = codec::encode(&msg).unwrap();
        ws.send(tungstenite::Message::Text(text.into())).await.unwrap();
        // Each matching message is acked only after it is persisted.
        tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("ack timed out")
            .unwrap()
            .unwrap();
    }
    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn round_trip_returns_all_messages_in_order() {
    let (addr, _state) = start_relay(MemoryStore::new()).await;
    seed_via_session(addr, "R", 4).await;

    let messages = history(addr, "receiver_id=R&limit=4").await;
    let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["m0", "m1", "m2", "m3"]);
    assert!(messages.iter().all(|m| m.receiver == "R" && m.sender == "B"));
}

#[tokio::test]
async fn smaller_limit_returns_exactly_that_many() {
    let (addr, _state) = start_relay(MemoryStore::new()).await;
    seed_via_session(addr, "R", 5).await;

    let messages = history(addr, "receiver_id=R&limit=2").await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "m0");
}

#[tokio::test]
async fn unknown_receiver_returns_empty_array() {
    let (addr, _state) = start_relay(MemoryStore::new()).await;
    seed_via_session(addr, "R", 1).await;

    let (status, _, body) = http_get(addr, "/messages?receiver_id=nobody").await;
    assert_eq!(status, 200);
    assert_eq!(body, "[]");
}

#[tokio::test]
async fn non_numeric_limit_uses_default() {
    let (addr, state) = start_relay(MemoryStore::new()).await;
    for i in 0..105 {
        state
            .store()
            .append(Message::now("B", "R", format!("m{i}")))
            .await
            .unwrap();
    }

    assert_eq!(history(addr, "receiver_id=R&limit=abc").await.len(), 100);
    assert_eq!(history(addr, "receiver_id=R").await.len(), 100);
    assert_eq!(history(addr, "receiver_id=R&limit=105").await.len(), 105);
}

#[tokio::test]
async fn repeated_query_keys_use_first_value() {
    let (addr, _state) = start_relay(MemoryStore::new()).await;
    seed_via_session(addr, "R", 8).await;

    let messages = history(addr, "receiver_id=R&limit=5&limit=6").await;
    assert_eq!(messages.len(), 5);

    let messages = history(addr, "receiver_id=R&receiver_id=S&limit=3").await;
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().all(|m| m.receiver == "R"));
}

#[tokio::test]
async fn limit_with_trailing_garbage_uses_leading_digits() {
    let (addr, _state) = start_relay(MemoryStore::new()).await;
    seed_via_session(addr, "R", 4).await;

    assert_eq!(history(addr, "receiver_id=R&limit=2abc").await.len(), 2);
}

#[tokio::test]
async fn missing_receiver_matches_empty_receivers_only() {
    let (addr, state) = start_relay(MemoryStore::new()).await;
    state.store().append(Message::now("B", "", "blank")).await.unwrap();
    state.store().append(Message::now("B", "R", "named")).await.unwrap();

    let messages = history(addr, "").await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "blank");
}

#[tokio::test]
async fn sqlite_history_preserves_timestamps() {
    let (addr, state) = start_relay(SqliteStore::open_in_memory().unwrap()).await;
    let original = Message::now("B", "R", "stamped");
    state.store().append(original.clone()).await.unwrap();

    let messages = history(addr, "receiver_id=R").await;
    assert_eq!(messages, vec![original]);
}
