#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as ServerMessage, WebSocket};
use axum::http::HeaderMap;
use futures::future::BoxFuture;
use futures::SinkExt;
use parking_lot::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use ttygate::bridge::{Bridge, BridgeError, BridgeFactory, BridgeOptions};
use ttygate::server::AppState;
use ttygate::slave::{FactoryError, Params, Slave, SlaveFactory};
use ttygate::{Options, Server};

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// -- test doubles ----------------------------------------------------

pub struct EchoSlave;

impl Slave for EchoSlave {
    fn window_title_variables(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut vars = serde_json::Map::new();
        vars.insert("command".to_string(), "echo".into());
        vars
    }
}

/// Records every factory call so tests can assert on the merged
/// parameters and forwarded headers.
#[derive(Default)]
pub struct RecordingFactory {
    pub created: AtomicUsize,
    pub last_params: Mutex<Option<Params>>,
    pub last_headers: Mutex<Option<HeaderMap>>,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl SlaveFactory for RecordingFactory {
    fn name(&self) -> &str {
        "echo"
    }

    fn create(
        &self,
        params: &Params,
        headers: Option<&HeaderMap>,
    ) -> Result<Box<dyn Slave>, FactoryError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock() = Some(params.clone());
        *self.last_headers.lock() = headers.cloned();
        Ok(Box::new(EchoSlave))
    }
}

/// A factory that always refuses, for backend-creation failure paths.
pub struct FailingFactory;

impl SlaveFactory for FailingFactory {
    fn name(&self) -> &str {
        "failing"
    }

    fn create(
        &self,
        _params: &Params,
        _headers: Option<&HeaderMap>,
    ) -> Result<Box<dyn Slave>, FactoryError> {
        Err(FactoryError("spawn refused".to_string()))
    }
}

/// Bridges that echo every text/binary frame until the client closes,
/// recording the options each session was built with.
#[derive(Default)]
pub struct EchoBridgeFactory {
    pub last_options: Mutex<Option<BridgeOptions>>,
}

impl EchoBridgeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl BridgeFactory for EchoBridgeFactory {
    fn create(
        &self,
        transport: WebSocket,
        _slave: Box<dyn Slave>,
        options: BridgeOptions,
    ) -> Result<Box<dyn Bridge>, BridgeError> {
        *self.last_options.lock() = Some(options);
        Ok(Box::new(EchoBridge { socket: transport }))
    }
}

pub struct EchoBridge {
    socket: WebSocket,
}

impl Bridge for EchoBridge {
    fn run<'a>(
        &'a mut self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), BridgeError>> {
        Box::pin(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(BridgeError::Canceled),
                    msg = self.socket.recv() => match msg {
                        Some(Ok(ServerMessage::Text(text))) => {
                            if self.socket.send(ServerMessage::Text(text)).await.is_err() {
                                return Err(BridgeError::MasterClosed);
                            }
                        }
                        Some(Ok(ServerMessage::Binary(data))) => {
                            if self.socket.send(ServerMessage::Binary(data)).await.is_err() {
                                return Err(BridgeError::MasterClosed);
                            }
                        }
                        Some(Ok(ServerMessage::Close(_))) | None => {
                            return Err(BridgeError::MasterClosed);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(_)) => return Err(BridgeError::MasterClosed),
                    }
                }
            }
        })
    }
}

/// Bridges whose run returns a fixed outcome immediately, for
/// close-classification tests.
pub struct ScriptedBridgeFactory {
    pub outcome: fn() -> Result<(), BridgeError>,
}

impl BridgeFactory for ScriptedBridgeFactory {
    fn create(
        &self,
        _transport: WebSocket,
        _slave: Box<dyn Slave>,
        _options: BridgeOptions,
    ) -> Result<Box<dyn Bridge>, BridgeError> {
        Ok(Box::new(ScriptedBridge {
            outcome: Some((self.outcome)()),
        }))
    }
}

struct ScriptedBridge {
    outcome: Option<Result<(), BridgeError>>,
}

impl Bridge for ScriptedBridge {
    fn run<'a>(
        &'a mut self,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), BridgeError>> {
        Box::pin(async move { self.outcome.take().unwrap_or(Ok(())) })
    }
}

// -- server bootstrap ------------------------------------------------

pub async fn start_server(
    options: Options,
    factory: Arc<dyn SlaveFactory>,
    bridges: Arc<dyn BridgeFactory>,
) -> (SocketAddr, AppState) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ttygate=debug".into()),
        )
        .try_init();

    let server = Server::new(options, factory, bridges);
    let state = server.state().clone();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, state)
}

// -- client helpers --------------------------------------------------

pub async fn connect(
    addr: SocketAddr,
    path: &str,
) -> (
    WsStream,
    tokio_tungstenite::tungstenite::handshake::client::Response,
) {
    tokio_tungstenite::connect_async(format!("ws://{addr}{path}"))
        .await
        .expect("websocket connect failed")
}

/// Connect and expect the server to refuse the upgrade with an HTTP
/// status; returns that status code.
pub async fn connect_expect_rejection(addr: SocketAddr, path: &str) -> u16 {
    match tokio_tungstenite::connect_async(format!("ws://{addr}{path}")).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            response.status().as_u16()
        }
        Ok(_) => panic!("expected the upgrade to be refused"),
        Err(other) => panic!("unexpected connect error: {other:?}"),
    }
}

pub async fn send_init(ws: &mut WsStream, token: &str, arguments: &str) {
    let init = serde_json::json!({ "AuthToken": token, "Arguments": arguments }).to_string();
    ws.send(Message::Text(init.into())).await.unwrap();
}

/// Open a session: connect, authenticate, verify the echo round-trip so
/// the caller knows the bridge is running.
pub async fn open_session(addr: SocketAddr, path: &str, token: &str) -> WsStream {
    let (mut ws, _) = connect(addr, path).await;
    send_init(&mut ws, token, "").await;
    ws.send(Message::Text("ready?".into())).await.unwrap();
    let echoed = recv_message(&mut ws).await;
    assert_eq!(echoed, Some(Message::Text("ready?".into())));
    ws
}

/// Receive the next message within a deadline; None on close/EOF.
pub async fn recv_message(ws: &mut WsStream) -> Option<Message> {
    use futures::StreamExt;
    match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
        Ok(Some(Ok(msg))) => Some(msg),
        Ok(Some(Err(_))) | Ok(None) => None,
        Err(_) => panic!("timed out waiting for a websocket message"),
    }
}

/// Poll a condition until it holds or a deadline passes.
pub async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
