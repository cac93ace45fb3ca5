//! End-to-end relay tests: a real hub on a loopback port with
//! tokio-tungstenite clients playing agent and viewers.

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_hub::{AppState, FileConfig, HubConfig};
use relay_protocol::DeviceId;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Timeout for each async operation in tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);
/// How long to wait before concluding nothing is coming.
const QUIET: Duration = Duration::from_millis(300);

const HELLO: &str = r#"{"type":"terminal_output","payload":{"content":"hello"}}"#;
const LS: &str = r#"{"type":"terminal_input","payload":{"content":"ls\n"}}"#;

async fn start_hub_with(file_config: FileConfig) -> (SocketAddr, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(HubConfig::from_file(&file_config));
    tokio::spawn(relay_hub::serve(
        listener,
        state.clone(),
        std::future::pending(),
    ));
    (addr, state)
}

async fn start_hub() -> (SocketAddr, AppState) {
    start_hub_with(FileConfig::default()).await
}

async fn connect(addr: SocketAddr, device: &str, token: Option<&str>) -> Client {
    let mut url = format!("ws://{addr}/ws?device_id={device}");
    if let Some(token) = token {
        url.push_str(&format!("&token={token}"));
    }
    let (ws, _) = timeout(TEST_TIMEOUT, tokio_tungstenite::connect_async(url))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    ws
}

/// Wait until the hub holds `expected` connections for `device`.
async fn wait_for_connections(state: &AppState, device: &str, expected: usize) {
    let device = DeviceId::from(device);
    timeout(TEST_TIMEOUT, async {
        while state.hub.connection_count(&device).await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("device never reached {expected} connections"));
}

async fn recv_text(ws: &mut Client) -> String {
    timeout(TEST_TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("no frame received")
}

async fn assert_quiet(ws: &mut Client) {
    match timeout(QUIET, ws.next()).await {
        Err(_) => {}
        Ok(frame) => panic!("expected no frame, got {frame:?}"),
    }
}

async fn send(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.into())).await.unwrap();
}

#[tokio::test]
async fn test_output_fans_out_to_viewers_not_sender() {
    let (addr, state) = start_hub().await;
    let mut agent = connect(addr, "dev1", None).await;
    let mut v1 = connect(addr, "dev1", Some("t1")).await;
    let mut v2 = connect(addr, "dev1", Some("t2")).await;
    wait_for_connections(&state, "dev1", 3).await;

    send(&mut agent, HELLO).await;

    assert_eq!(recv_text(&mut v1).await, HELLO);
    assert_eq!(recv_text(&mut v2).await, HELLO);
    assert_quiet(&mut agent).await;
}

#[tokio::test]
async fn test_input_reaches_agent_only() {
    let (addr, state) = start_hub().await;
    let mut agent = connect(addr, "dev1", None).await;
    let mut v1 = connect(addr, "dev1", Some("t1")).await;
    let mut v2 = connect(addr, "dev1", Some("t2")).await;
    wait_for_connections(&state, "dev1", 3).await;

    send(&mut v1, LS).await;

    assert_eq!(recv_text(&mut agent).await, LS);
    assert_quiet(&mut v2).await;
    assert_quiet(&mut v1).await;
}

#[tokio::test]
async fn test_late_viewer_receives_last_output_once() {
    let (addr, state) = start_hub().await;
    let mut agent = connect(addr, "dev1", None).await;
    let mut v1 = connect(addr, "dev1", Some("t1")).await;
    wait_for_connections(&state, "dev1", 2).await;

    send(&mut agent, HELLO).await;
    assert_eq!(recv_text(&mut v1).await, HELLO);

    let mut v3 = connect(addr, "dev1", Some("t3")).await;
    assert_eq!(recv_text(&mut v3).await, HELLO);
    assert_quiet(&mut v3).await;
}

#[tokio::test]
async fn test_agent_drop_leaves_viewers_and_input_is_noop() {
    let (addr, state) = start_hub().await;
    let agent = connect(addr, "dev1", None).await;
    let mut v1 = connect(addr, "dev1", Some("t1")).await;
    let mut v2 = connect(addr, "dev1", Some("t2")).await;
    wait_for_connections(&state, "dev1", 3).await;

    // Abrupt disconnect, no close handshake
    drop(agent);
    wait_for_connections(&state, "dev1", 2).await;

    let delivered_before = state.metrics.snapshot().messages.delivered;
    send(&mut v1, LS).await;
    assert_quiet(&mut v2).await;
    assert_quiet(&mut v1).await;

    assert_eq!(state.hub.connection_count(&"dev1".into()).await, 2);
    assert_eq!(state.metrics.snapshot().messages.delivered, delivered_before);
}

#[tokio::test]
async fn test_other_kinds_broadcast_to_everyone() {
    let (addr, state) = start_hub().await;
    let mut agent = connect(addr, "dev1", None).await;
    let mut viewer = connect(addr, "dev1", Some("t1")).await;
    let mut elsewhere = connect(addr, "dev2", Some("t2")).await;
    wait_for_connections(&state, "dev1", 2).await;
    wait_for_connections(&state, "dev2", 1).await;

    let resize = r#"{"type":"resize","payload":{"rows":40,"cols":120}}"#;
    send(&mut viewer, resize).await;

    assert_eq!(recv_text(&mut agent).await, resize);
    assert_eq!(recv_text(&mut viewer).await, resize);
    assert_quiet(&mut elsewhere).await;
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let (addr, state) = start_hub().await;
    let mut agent = connect(addr, "dev1", None).await;
    let mut viewer = connect(addr, "dev1", Some("t1")).await;
    wait_for_connections(&state, "dev1", 2).await;

    send(&mut agent, "definitely not json").await;
    send(&mut agent, r#"{"payload":"no type"}"#).await;
    send(&mut agent, HELLO).await;

    assert_eq!(recv_text(&mut viewer).await, HELLO);
    assert_eq!(state.hub.connection_count(&"dev1".into()).await, 2);
    assert_eq!(state.metrics.snapshot().messages.malformed, 2);
}

#[tokio::test]
async fn test_binary_json_frame_is_relayed_as_text() {
    let (addr, state) = start_hub().await;
    let mut agent = connect(addr, "dev1", None).await;
    let mut viewer = connect(addr, "dev1", Some("t1")).await;
    wait_for_connections(&state, "dev1", 2).await;

    agent
        .send(Message::Binary(HELLO.as_bytes().to_vec().into()))
        .await
        .unwrap();
    assert_eq!(recv_text(&mut viewer).await, HELLO);
}

#[tokio::test]
async fn test_missing_device_id_is_rejected() {
    let (addr, _state) = start_hub().await;
    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect_err("connection without device_id must fail");
    match err {
        tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 400),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_last_device_connection_leaving_prunes_device() {
    let (addr, state) = start_hub().await;
    let mut agent = connect(addr, "dev1", None).await;
    wait_for_connections(&state, "dev1", 1).await;
    assert_eq!(state.hub.device_count().await, 1);

    agent.close(None).await.unwrap();
    wait_for_connections(&state, "dev1", 0).await;
    assert_eq!(state.hub.device_count().await, 0);
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let mut file_config = FileConfig::default();
    file_config.websocket.idle_timeout_secs = 1;
    let (addr, state) = start_hub_with(file_config).await;

    let mut agent = connect(addr, "dev1", None).await;
    wait_for_connections(&state, "dev1", 1).await;
    wait_for_connections(&state, "dev1", 0).await;

    // The write pump says goodbye once the queue closes
    let closed = timeout(TEST_TIMEOUT, async {
        loop {
            match agent.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    assert_eq!(state.metrics.snapshot().errors.socket, 1);
}
