/// WebSocket integration tests
/// Runs a real server and drives it with WebSocket clients to check binding,
/// presence, fan-out and room deletion
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tempchat_server::db::models::AutoDeletePolicy;
use tempchat_server::server::{create_test_http_server_with_state, AppState};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (AppState, String) {
    let state = AppState::for_tests();
    let (server, addr) =
        create_test_http_server_with_state(state.clone()).expect("Failed to create server");
    actix_web::rt::spawn(server);
    tokio::time::sleep(Duration::from_millis(100)).await;
    (state, addr)
}

async fn connect(addr: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("Failed to connect");
    socket
}

async fn send(socket: &mut Socket, frame: Value) {
    socket
        .send(Message::text(frame.to_string()))
        .await
        .expect("Failed to send frame");
}

async fn next_frame(socket: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("Timed out waiting for frame")
            .expect("Socket closed")
            .expect("Socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("Invalid JSON frame");
        }
    }
}

async fn assert_silent(socket: &mut Socket) {
    let result = tokio::time::timeout(Duration::from_millis(200), socket.next()).await;
    assert!(result.is_err(), "unexpected frame: {:?}", result);
}

#[actix_web::test]
async fn test_bind_presence_and_messages() {
    let (state, addr) = start_server().await;
    let created = state
        .rooms
        .create("device_a", AutoDeletePolicy::OneMinute, None)
        .await
        .unwrap();
    let joined = state
        .rooms
        .join(&created.room_code, &created.password, Some("device_b"))
        .await
        .unwrap();

    let mut alice = connect(&addr).await;
    let mut bob = connect(&addr).await;

    send(
        &mut alice,
        json!({"type": "join-room", "roomCode": created.room_code, "token": created.token, "displayName": "Alice"}),
    )
    .await;
    // Give the first bind time to land before the second
    tokio::time::sleep(Duration::from_millis(100)).await;
    send(
        &mut bob,
        json!({"type": "join-room", "roomCode": created.room_code, "token": joined.token, "displayName": "Bob"}),
    )
    .await;

    let frame = next_frame(&mut alice).await;
    assert_eq!(
        frame,
        json!({"type": "user-joined", "displayName": "Bob", "memberCount": 2})
    );

    send(
        &mut bob,
        json!({"type": "send-message", "body": "hello", "clientMessageId": "msg-1"}),
    )
    .await;

    for socket in [&mut alice, &mut bob] {
        let frame = next_frame(socket).await;
        assert_eq!(frame["type"], "new-message");
        assert_eq!(frame["id"], "msg-1");
        assert_eq!(frame["author"], "Bob");
        assert_eq!(frame["body"], "hello");
        assert_eq!(frame["autoDelete"], "1m");
        assert!(frame["timestamp"].as_i64().unwrap() > 0);
    }

    bob.close(None).await.expect("Failed to close");
    let frame = next_frame(&mut alice).await;
    assert_eq!(
        frame,
        json!({"type": "user-left", "displayName": "Bob", "memberCount": 1})
    );
}

#[actix_web::test]
async fn test_bind_errors() {
    let (state, addr) = start_server().await;
    let first = state
        .rooms
        .create("device_a", AutoDeletePolicy::OneHour, None)
        .await
        .unwrap();
    let other = state
        .rooms
        .create("device_a", AutoDeletePolicy::OneHour, None)
        .await
        .unwrap();

    let mut socket = connect(&addr).await;

    send(
        &mut socket,
        json!({"type": "join-room", "roomCode": "NOPE00", "token": first.token, "displayName": "A"}),
    )
    .await;
    assert_eq!(
        next_frame(&mut socket).await,
        json!({"type": "error", "reason": "room-not-found"})
    );

    // A token minted for another room does not admit
    send(
        &mut socket,
        json!({"type": "join-room", "roomCode": first.room_code, "token": other.token, "displayName": "A"}),
    )
    .await;
    assert_eq!(
        next_frame(&mut socket).await,
        json!({"type": "error", "reason": "invalid-token"})
    );

    send(&mut socket, json!({"type": "no-such-type"})).await;
    assert_eq!(
        next_frame(&mut socket).await,
        json!({"type": "error", "reason": "invalid-message"})
    );

    send(
        &mut socket,
        json!({"type": "join-room", "roomCode": first.room_code, "token": first.token, "displayName": "A"}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    send(
        &mut socket,
        json!({"type": "join-room", "roomCode": first.room_code, "token": first.token, "displayName": "A"}),
    )
    .await;
    assert_eq!(
        next_frame(&mut socket).await,
        json!({"type": "error", "reason": "already-bound"})
    );
}

#[actix_web::test]
async fn test_unbound_send_is_ignored() {
    let (_state, addr) = start_server().await;
    let mut socket = connect(&addr).await;

    send(&mut socket, json!({"type": "send-message", "body": "hello"})).await;
    assert_silent(&mut socket).await;
}

#[actix_web::test]
async fn test_room_deletion_reaches_bound_sessions() {
    let (state, addr) = start_server().await;
    let created = state
        .rooms
        .create("device_a", AutoDeletePolicy::OneHour, None)
        .await
        .unwrap();

    let mut socket = connect(&addr).await;
    send(
        &mut socket,
        json!({"type": "join-room", "roomCode": created.room_code, "token": created.token, "displayName": "Alice"}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    state
        .rooms
        .delete(&created.room_code, Some(created.token.as_str()))
        .await
        .unwrap();
    state.router.close_room(&created.room_code).await;

    assert_eq!(next_frame(&mut socket).await, json!({"type": "room-deleted"}));

    // The session is unbound, so further sends go nowhere
    send(&mut socket, json!({"type": "send-message", "body": "anyone?"})).await;
    assert_silent(&mut socket).await;
}

#[actix_web::test]
async fn test_large_attachment_frame_is_accepted() {
    let (state, addr) = start_server().await;
    let created = state
        .rooms
        .create("device_a", AutoDeletePolicy::OneHour, None)
        .await
        .unwrap();

    let mut socket = connect(&addr).await;
    send(
        &mut socket,
        json!({"type": "join-room", "roomCode": created.room_code, "token": created.token, "displayName": "Alice"}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Well above the default 64 KiB actix frame limit
    let data = "A".repeat(512 * 1024);
    send(
        &mut socket,
        json!({
            "type": "send-message",
            "fileInfo": {"originalName": "blob.bin", "size": 393216, "mimeType": "application/octet-stream", "data": data}
        }),
    )
    .await;

    let frame = next_frame(&mut socket).await;
    assert_eq!(frame["type"], "new-message");
    assert_eq!(frame["fileInfo"]["originalName"], "blob.bin");
    assert_eq!(frame["fileInfo"]["data"].as_str().map(str::len), Some(512 * 1024));
}
