//! WebSocket transport integration tests.
//!
//! Runs the connection manager against a local WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use claw_realtime::{
    BroadcastBus, ConnectError, ConnectionManager, ConnectionState, ManagerConfig,
    ReconnectPolicyConfig, WebSocketTransport, PERMANENT_CLOSE_REASON,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers - Mock Realtime Server
// ============================================================================

struct MockServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl MockServer {
    async fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        Self { listener, addr }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn accept(&self) -> WebSocketStream<TcpStream> {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("client connects in time")
            .expect("accept");
        accept_async(stream).await.expect("websocket handshake")
    }
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("valid frame");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("json frame");
        }
    }
}

fn config(url: String) -> ManagerConfig {
    ManagerConfig::new(url).with_reconnect(
        ReconnectPolicyConfig::default()
            .with_base_delay(Duration::from_millis(50))
            .with_max_delay(Duration::from_millis(200))
            .with_max_attempts(3)
            .with_jitter(Duration::ZERO),
    )
}

fn start(config: ManagerConfig) -> (ConnectionManager, Arc<BroadcastBus>) {
    let bus = Arc::new(BroadcastBus::new());
    let manager = ConnectionManager::start(config, WebSocketTransport::new(), Arc::clone(&bus) as _);
    (manager, bus)
}

async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
    timeout(WAIT, async {
        while manager.connection_state() != state {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("state reached in time");
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_connects_and_routes_session_updates() {
    let server = MockServer::new().await;
    let (manager, bus) = start(config(server.url()));
    let mut deltas = bus.on("Session::Delta");

    let (outcome, mut ws) = tokio::join!(manager.connect(), server.accept());
    assert_eq!(outcome, Ok(true));
    assert!(manager.transport_id().is_some());

    let frame = json!({
        "event": "session_update",
        "data": {"type": "Delta", "sessionId": "s-1", "text": "hel"}
    });
    ws.send(Message::text(frame.to_string())).await.expect("push");

    let event = timeout(WAIT, deltas.recv())
        .await
        .expect("routed in time")
        .expect("bus open");
    assert_eq!(event.session_id, "s-1");
    assert_eq!(event.payload.get("text"), Some(&json!("hel")));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_outbound_frames_reach_server() {
    let server = MockServer::new().await;
    let (manager, _bus) = start(config(server.url()));

    let (outcome, mut ws) = tokio::join!(manager.connect(), server.accept());
    assert_eq!(outcome, Ok(true));

    manager.send("typing", json!({"sessionId": "s-9"}));
    let frame = next_json(&mut ws).await;
    assert_eq!(frame, json!({"event": "typing", "data": {"sessionId": "s-9"}}));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_heartbeat_reaches_server() {
    let server = MockServer::new().await;
    let config = config(server.url()).with_heartbeat_interval(Duration::from_millis(100));
    let (manager, _bus) = start(config);

    let (outcome, mut ws) = tokio::join!(manager.connect(), server.accept());
    assert_eq!(outcome, Ok(true));

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["event"], "heartbeat");
    assert!(frame["data"]["timestamp"].is_string());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_permanent_close_stays_disconnected() {
    let server = MockServer::new().await;
    let (manager, _bus) = start(config(server.url()));

    let (outcome, mut ws) = tokio::join!(manager.connect(), server.accept());
    assert_eq!(outcome, Ok(true));

    ws.close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: PERMANENT_CLOSE_REASON.into(),
    }))
    .await
    .expect("close");

    wait_for_state(&manager, ConnectionState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
    assert_eq!(manager.reconnect_attempts(), 0);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_reconnects_after_server_drop() {
    let server = MockServer::new().await;
    let (manager, _bus) = start(config(server.url()));

    let (outcome, ws) = tokio::join!(manager.connect(), server.accept());
    assert_eq!(outcome, Ok(true));
    let first = manager.transport_id();

    drop(ws);
    let _second = server.accept().await;
    wait_for_state(&manager, ConnectionState::Connected).await;

    assert_ne!(manager.transport_id(), first);
    assert_eq!(manager.reconnect_attempts(), 0);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_server_exhausts_retries() {
    let url = {
        let server = MockServer::new().await;
        server.url()
    };
    let (manager, _bus) = start(config(url));

    let outcome = timeout(WAIT, manager.connect()).await.expect("gives up in time");
    assert_eq!(outcome, Err(ConnectError::MaxAttemptsExceeded { attempts: 4 }));
    assert_eq!(manager.connection_state(), ConnectionState::Disconnected);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_invalid_url_fails_like_a_refused_link() {
    let config = ManagerConfig::new("http://not-a-socket.test").with_reconnect(
        ReconnectPolicyConfig::default()
            .with_base_delay(Duration::from_millis(10))
            .with_max_attempts(1)
            .with_jitter(Duration::ZERO),
    );
    let (manager, _bus) = start(config);

    let outcome = timeout(WAIT, manager.connect()).await.expect("gives up in time");
    assert_eq!(outcome, Err(ConnectError::MaxAttemptsExceeded { attempts: 2 }));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_stalled_handshake_sockets_are_closed() {
    let server = MockServer::new().await;
    let config = config(server.url())
        .with_connect_timeout(Duration::from_millis(200))
        .with_reconnect(
            ReconnectPolicyConfig::default()
                .with_base_delay(Duration::from_millis(50))
                .with_max_attempts(1)
                .with_jitter(Duration::ZERO),
        );
    let (manager, _bus) = start(config);

    // Accept TCP but never answer the upgrade request.
    let stalled = tokio::spawn(async move {
        let mut sockets = Vec::new();
        for _ in 0..2 {
            let (stream, _) = server.listener.accept().await.expect("accept");
            sockets.push(stream);
        }
        sockets
    });

    let outcome = timeout(WAIT, manager.connect()).await.expect("gives up in time");
    assert_eq!(outcome, Err(ConnectError::MaxAttemptsExceeded { attempts: 2 }));
    manager.shutdown().await;

    let sockets = timeout(WAIT, stalled)
        .await
        .expect("both attempts reached the server")
        .expect("accept task");
    for mut socket in sockets {
        let mut request = Vec::new();
        let read = timeout(WAIT, socket.read_to_end(&mut request)).await;
        assert!(read.is_ok(), "client side of a timed-out handshake is still open");
    }
}
