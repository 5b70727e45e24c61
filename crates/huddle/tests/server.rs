//! End-to-end tests for the Huddle server: admission over HTTP, then whole
//! voting rounds over real WebSocket clients.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use huddle::prelude::*;
use huddle::{ROOM_CODE_HEADER, SECRET_HEADER};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const SECRET: &str = "test-secret";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =========================================================================
// Helpers
// =========================================================================

fn test_config() -> ServerConfig {
    ServerConfig::default()
        .with_bind_addr("127.0.0.1:0")
        .with_client_secret(SECRET)
        .with_rate_limit_window(Duration::ZERO)
}

/// Starts a server on an ephemeral port and returns its address and
/// registry.
async fn start_server(config: ServerConfig) -> (String, RoomRegistry) {
    let server = HuddleServer::builder()
        .config(config)
        .build()
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("bound address").to_string();
    let registry = server.registry().clone();
    tokio::spawn(server.run());
    tokio::time::sleep(Duration::from_millis(10)).await;
    (addr, registry)
}

async fn connect_with(
    addr: &str,
    path_and_query: &str,
    secret: Option<&str>,
) -> Result<(Client, Option<String>), tungstenite::Error> {
    let mut request = format!("ws://{addr}{path_and_query}").into_client_request()?;
    if let Some(secret) = secret {
        request
            .headers_mut()
            .insert(SECRET_HEADER, HeaderValue::from_str(secret).unwrap());
    }
    let (client, response) = tokio_tungstenite::connect_async(request).await?;
    let code = response
        .headers()
        .get(ROOM_CODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    Ok((client, code))
}

async fn connect(addr: &str, path_and_query: &str) -> (Client, Option<String>) {
    connect_with(addr, path_and_query, Some(SECRET))
        .await
        .expect("client should connect")
}

/// Creates a room and returns the host client with the room code.
async fn create_room(addr: &str) -> (Client, String) {
    let (mut host, code) = connect(addr, "/ws?mode=create").await;
    let code = code.expect("create response carries the room code");
    assert_eq!(next_json(&mut host).await, json!({ "type": "participant_list", "payload": [] }));
    (host, code)
}

async fn join(addr: &str, code: &str, name: &str) -> Client {
    let (client, _) = connect(addr, &format!("/ws?mode=join&code={code}&name={name}")).await;
    client
}

/// HTTP status of a refused upgrade.
async fn rejected_status(addr: &str, path_and_query: &str, secret: Option<&str>) -> u16 {
    match connect_with(addr, path_and_query, secret).await {
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(e) => panic!("expected an HTTP rejection, got {e}"),
        Ok(_) => panic!("expected an HTTP rejection, upgrade succeeded"),
    }
}

async fn next_message(client: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("timed out waiting for the server")
        .expect("stream ended")
        .expect("read failed")
}

async fn next_json(client: &mut Client) -> Value {
    match next_message(client).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).expect("server sends JSON"),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::text(value.to_string()))
        .await
        .expect("send should succeed");
}

/// Sends a plain HTTP request and returns the status and body.
async fn http(addr: &str, method: &str, path: &str, secret: Option<&str>) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.expect("should connect");
    let secret = secret
        .map(|s| format!("X-Client-Secret: {s}\r\n"))
        .unwrap_or_default();
    let request =
        format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\n{secret}Content-Length: 0\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("should write");

    let mut response = String::new();
    tokio::time::timeout(Duration::from_secs(2), stream.read_to_string(&mut response))
        .await
        .expect("timed out waiting for the server")
        .expect("should read");

    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("response has a status line");
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_owned())
        .unwrap_or_default();
    (status, body)
}

fn progress(current: usize, total: usize) -> Value {
    json!({ "type": "vote_progress", "payload": { "current": current, "total": total } })
}

// =========================================================================
// Admission
// =========================================================================

#[tokio::test]
async fn test_upgrade_without_secret_is_unauthorized() {
    let (addr, registry) = start_server(test_config()).await;

    assert_eq!(rejected_status(&addr, "/ws?mode=create", None).await, 401);
    assert_eq!(
        rejected_status(&addr, "/ws?mode=create", Some("wrong")).await,
        401
    );
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_upgrade_create_returns_room_code_header() {
    let (addr, registry) = start_server(test_config()).await;

    let (_host, code) = create_room(&addr).await;

    assert_eq!(code.len(), 4);
    assert!(registry.get(&RoomCode::new(&code)).is_ok());
}

#[tokio::test]
async fn test_upgrade_unknown_code_is_not_found() {
    let (addr, _registry) = start_server(test_config()).await;
    let status = rejected_status(&addr, "/ws?mode=join&code=ZZZZ&name=Bob", Some(SECRET)).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_upgrade_malformed_parameters_are_bad_requests() {
    let (addr, _registry) = start_server(test_config()).await;

    for query in [
        "/ws",
        "/ws?mode=spectate",
        "/ws?mode=join&name=Bob",
        "/ws?mode=join&code=AB12",
    ] {
        assert_eq!(rejected_status(&addr, query, Some(SECRET)).await, 400, "{query}");
    }
}

#[tokio::test]
async fn test_upgrade_wrong_path_is_not_found() {
    let (addr, _registry) = start_server(test_config()).await;
    assert_eq!(
        rejected_status(&addr, "/socket?mode=create", Some(SECRET)).await,
        404
    );
}

#[tokio::test]
async fn test_upgrade_second_attempt_within_window_is_rate_limited() {
    let config = test_config().with_rate_limit_window(Duration::from_secs(60));
    let (addr, registry) = start_server(config).await;

    let (_host, _code) = create_room(&addr).await;
    assert_eq!(
        rejected_status(&addr, "/ws?mode=create", Some(SECRET)).await,
        429
    );
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_upgrade_hosts_room_created_through_registry() {
    let (addr, registry) = start_server(test_config()).await;
    let room = registry.create_room().unwrap();

    let (mut host, code) = connect(&addr, &format!("/ws?mode=create&code={}", room.code())).await;

    assert_eq!(code.as_deref(), Some(room.code().as_str()));
    assert_eq!(next_json(&mut host).await["type"], "participant_list");
    assert!(room.info().await.unwrap().has_host);
}

// =========================================================================
// Plain HTTP
// =========================================================================

#[tokio::test]
async fn test_health_returns_ok() {
    let (addr, _registry) = start_server(test_config()).await;
    assert_eq!(http(&addr, "GET", "/health", None).await, (200, "OK".to_owned()));
}

#[tokio::test]
async fn test_create_returns_joinable_room_code() {
    let (addr, registry) = start_server(test_config()).await;

    let (status, code) = http(&addr, "POST", "/create", Some(SECRET)).await;
    assert_eq!(status, 200);
    assert_eq!(code.len(), 4);
    assert!(registry.get(&RoomCode::new(&code)).is_ok());

    // The code is usable by a host and participants over the WebSocket.
    let (mut host, header) = connect(&addr, &format!("/ws?mode=create&code={code}")).await;
    assert_eq!(header.as_deref(), Some(code.as_str()));
    assert_eq!(next_json(&mut host).await["type"], "participant_list");
    let mut alice = join(&addr, &code, "Alice").await;
    assert_eq!(next_json(&mut alice).await["type"], "participant_list");
    assert_eq!(next_json(&mut host).await["payload"], json!({ "name": "Alice" }));
}

#[tokio::test]
async fn test_create_without_secret_is_unauthorized() {
    let (addr, registry) = start_server(test_config()).await;

    assert_eq!(http(&addr, "POST", "/create", None).await.0, 401);
    assert_eq!(http(&addr, "POST", "/create", Some("wrong")).await.0, 401);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_create_is_rate_limited_with_upgrades() {
    let config = test_config().with_rate_limit_window(Duration::from_secs(60));
    let (addr, registry) = start_server(config).await;

    assert_eq!(http(&addr, "POST", "/create", Some(SECRET)).await.0, 200);
    assert_eq!(http(&addr, "POST", "/create", Some(SECRET)).await.0, 429);
    assert_eq!(
        rejected_status(&addr, "/ws?mode=create", Some(SECRET)).await,
        429
    );
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_plain_request_wrong_method_or_path() {
    let (addr, registry) = start_server(test_config()).await;

    assert_eq!(http(&addr, "GET", "/create", Some(SECRET)).await.0, 405);
    assert_eq!(http(&addr, "GET", "/ws", Some(SECRET)).await.0, 404);
    assert!(registry.is_empty());
}

// =========================================================================
// Rooms over the wire
// =========================================================================

#[tokio::test]
async fn test_two_participants_vote_and_reveal_over_websocket() {
    let (addr, _registry) = start_server(test_config()).await;
    let (mut host, code) = create_room(&addr).await;

    let mut alice = join(&addr, &code, "Alice").await;
    assert_eq!(
        next_json(&mut alice).await,
        json!({ "type": "participant_list", "payload": ["Alice"] })
    );
    assert_eq!(next_json(&mut alice).await["type"], "participant_join");

    let mut bob = join(&addr, &code, "Bob").await;
    assert_eq!(
        next_json(&mut bob).await,
        json!({ "type": "participant_list", "payload": ["Alice", "Bob"] })
    );
    assert_eq!(next_json(&mut bob).await["type"], "participant_join");
    assert_eq!(next_json(&mut alice).await["payload"], json!({ "name": "Bob" }));
    assert_eq!(next_json(&mut host).await["payload"], json!({ "name": "Alice" }));
    assert_eq!(next_json(&mut host).await["payload"], json!({ "name": "Bob" }));

    send_json(&mut host, json!({ "type": "start" })).await;
    for client in [&mut host, &mut alice, &mut bob] {
        assert_eq!(next_json(client).await, json!({ "type": "start" }));
    }

    send_json(&mut alice, json!({ "type": "vote", "payload": { "value": "5" } })).await;
    assert_eq!(next_json(&mut alice).await, json!({ "type": "vote_confirmed" }));
    assert_eq!(next_json(&mut alice).await, progress(1, 2));
    assert_eq!(next_json(&mut bob).await, progress(1, 2));

    send_json(&mut bob, json!({ "type": "vote", "payload": { "value": 8 } })).await;
    assert_eq!(next_json(&mut bob).await, json!({ "type": "vote_confirmed" }));

    let reveal = json!({ "type": "reveal", "payload": { "Alice": "5", "Bob": "8" } });
    assert_eq!(next_json(&mut host).await, progress(1, 2));
    for client in [&mut host, &mut alice, &mut bob] {
        assert_eq!(next_json(client).await, progress(2, 2));
        assert_eq!(next_json(client).await, reveal);
    }

    // A second vote after the reveal is refused without a broadcast.
    send_json(&mut bob, json!({ "type": "vote", "payload": { "value": "3" } })).await;
    assert_eq!(
        next_json(&mut bob).await,
        json!({ "type": "vote_rejected", "payload": { "reason": "already_voted" } })
    );
}

#[tokio::test]
async fn test_duplicate_name_is_closed_with_policy_frame() {
    let (addr, _registry) = start_server(test_config()).await;
    let (_host, code) = create_room(&addr).await;
    let _alice = join(&addr, &code, "Alice").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut impostor = join(&addr, &code, "Alice").await;

    match next_message(&mut impostor).await {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.code, CloseCode::Policy);
            assert_eq!(frame.reason.as_str(), "name_taken");
        }
        other => panic!("expected a policy close, got {other:?}"),
    }
}

#[tokio::test]
async fn test_participant_disconnect_is_announced_and_last_leave_retires_room() {
    let (addr, registry) = start_server(test_config()).await;
    let (mut host, code) = create_room(&addr).await;
    let mut alice = join(&addr, &code, "Alice").await;
    assert_eq!(next_json(&mut host).await["type"], "participant_join");

    alice.close(None).await.expect("close should succeed");
    assert_eq!(
        next_json(&mut host).await,
        json!({ "type": "participant_leave", "payload": { "name": "Alice" } })
    );

    host.close(None).await.expect("close should succeed");
    let room_code = RoomCode::new(&code);
    tokio::time::timeout(Duration::from_secs(2), async {
        while registry.get(&room_code).is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("room should retire after its last member leaves");
}
