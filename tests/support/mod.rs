#![allow(dead_code)]

use async_trait::async_trait;
use fxstream::core::config::{Credentials, Endpoint, StreamConfig};
use fxstream::core::kernel::{BoxedSink, BoxedSource, FrameSink, FrameSource, Transport};
use fxstream::{ConnectionState, Session, SessionEvent, StreamError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

pub const SECRET: &str = "ZngtdGVzdC1zZWNyZXQta2V5";
pub const PATH: &str = "/price.tickers";
pub const WAIT: Duration = Duration::from_secs(5);

pub fn test_config() -> StreamConfig {
    StreamConfig::new(
        Endpoint::new("stream.test", PATH, false),
        Credentials::new(
            "test_api_key".to_string(),
            SECRET.to_string(),
            "test_passphrase".to_string(),
        ),
    )
}

pub fn auth_ok() -> Value {
    json!({"event": "auth_response", "status": "success", "request_id": "auth"})
}

pub fn auth_failed() -> Value {
    json!({
        "event": "auth_response",
        "status": "failure",
        "request_id": "auth",
        "body": {"reason": "invalid signature"}
    })
}

pub fn stream_frame(seq: u64) -> Value {
    json!({
        "event": "stream",
        "status": "success",
        "request_id": seq.to_string(),
        "body": [{
            "t_create": 1_700_000_000_000_i64 + seq as i64,
            "quantity": 1.0,
            "quantity_token": "BTC",
            "sell_price": 64000.5,
            "buy_price": 64001.25,
            "base_token": "BTC",
            "quote_token": "USD"
        }]
    })
}

#[derive(Default)]
struct Script {
    failing_connects: usize,
    hang_connects: bool,
}

/// In-memory transport; every `connect` hands a `MockConnection` to the
/// paired `MockServer`
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
    connects: Arc<AtomicUsize>,
    accepted: mpsc::UnboundedSender<MockConnection>,
}

pub struct MockServer {
    script: Arc<Mutex<Script>>,
    connects: Arc<AtomicUsize>,
    accepted: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockConnection>>,
}

impl MockTransport {
    pub fn new() -> (Self, MockServer) {
        let script = Arc::new(Mutex::new(Script::default()));
        let connects = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                script: Arc::clone(&script),
                connects: Arc::clone(&connects),
                accepted: tx,
            },
            MockServer {
                script,
                connects,
                accepted: tokio::sync::Mutex::new(rx),
            },
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<(BoxedSink, BoxedSource), StreamError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let hang = {
            let mut script = self.script.lock().unwrap();
            if script.failing_connects > 0 {
                script.failing_connects -= 1;
                return Err(StreamError::ConnectFailed(format!("{} refused", url)));
            }
            script.hang_connects
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let broken = Arc::new(AtomicBool::new(false));
        let stalled = Arc::new(AtomicBool::new(false));

        let connection = MockConnection {
            url: url.to_string(),
            sent: sent_rx,
            inbound: inbound_tx,
            closed: Arc::clone(&closed),
            broken: Arc::clone(&broken),
            stalled: Arc::clone(&stalled),
        };
        self.accepted
            .send(connection)
            .map_err(|_| StreamError::ConnectFailed("mock server dropped".to_string()))?;

        Ok((
            Box::new(MockSink {
                sent: sent_tx,
                closed,
                broken,
                stalled,
            }),
            Box::new(MockSource { inbound: inbound_rx }),
        ))
    }
}

impl MockServer {
    /// Wait for the client's next connection
    pub async fn next_connection(&self) -> MockConnection {
        let mut accepted = self.accepted.lock().await;
        timeout(WAIT, accepted.recv())
            .await
            .expect("no connection attempt")
            .expect("transport dropped")
    }

    /// True if no connection arrives within `within`
    pub async fn no_connection_within(&self, within: Duration) -> bool {
        let mut accepted = self.accepted.lock().await;
        timeout(within, accepted.recv()).await.is_err()
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.script.lock().unwrap().failing_connects = count;
    }

    pub fn hang_connects(&self, hang: bool) {
        self.script.lock().unwrap().hang_connects = hang;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

/// Server side of one accepted connection
pub struct MockConnection {
    pub url: String,
    sent: mpsc::UnboundedReceiver<Message>,
    inbound: mpsc::UnboundedSender<Result<Message, StreamError>>,
    closed: Arc<AtomicBool>,
    broken: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl MockConnection {
    /// Next frame the client wrote, parsed as JSON
    pub async fn next_frame(&mut self) -> Value {
        let message = timeout(WAIT, self.sent.recv())
            .await
            .expect("client sent nothing")
            .expect("client sink dropped");
        match message {
            Message::Text(text) => serde_json::from_str(&text).expect("client sent invalid JSON"),
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    pub fn try_next_frame(&mut self) -> Option<Value> {
        match self.sent.try_recv() {
            Ok(Message::Text(text)) => serde_json::from_str(&text).ok(),
            _ => None,
        }
    }

    /// Read the auth frame and answer it
    pub async fn accept_auth(&mut self) -> Value {
        let frame = self.next_frame().await;
        assert_eq!(frame["action"], "auth");
        self.push(auth_ok());
        frame
    }

    pub fn push(&self, value: Value) {
        self.push_raw(&value.to_string());
    }

    pub fn push_raw(&self, text: &str) {
        // the read loop may already be gone in tests that close the session
        let _ = self.inbound.send(Ok(Message::Text(text.to_string())));
    }

    pub fn push_error(&self, reason: &str) {
        let _ = self
            .inbound
            .send(Err(StreamError::TransportError(reason.to_string())));
    }

    /// Make every further client write fail
    pub fn break_writes(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Make every further client write hang until resumed
    pub fn stall_writes(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub fn resume_writes(&self) {
        self.stalled.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Remote close: the client's reader sees end of stream
    pub fn drop_connection(self) {}
}

struct MockSink {
    sent: mpsc::UnboundedSender<Message>,
    closed: Arc<AtomicBool>,
    broken: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, message: Message) -> Result<(), StreamError> {
        while self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        if self.broken.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(StreamError::TransportError("broken pipe".to_string()));
        }
        self.sent
            .send(message)
            .map_err(|_| StreamError::TransportError("peer gone".to_string()))
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockSource {
    inbound: mpsc::UnboundedReceiver<Result<Message, StreamError>>,
}

#[async_trait]
impl FrameSource for MockSource {
    async fn next_frame(&mut self) -> Option<Result<Message, StreamError>> {
        self.inbound.recv().await
    }
}

pub fn session() -> (Session<MockTransport>, MockServer) {
    session_with(test_config())
}

pub fn session_with(config: StreamConfig) -> (Session<MockTransport>, MockServer) {
    let (transport, server) = MockTransport::new();
    let session = Session::new(config, transport).expect("valid test config");
    (session, server)
}

pub async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("no event")
        .expect("event stream closed")
}

/// Skip events until one with the given name arrives
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    name: &str,
) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if event.name() == name {
            return event;
        }
    }
}

pub async fn wait_for_state<T: Transport>(session: &Session<T>, state: ConnectionState) {
    let mut watch = session.watch_state();
    timeout(WAIT, watch.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("state never became {}", state))
        .expect("session dropped");
}

/// Connect and authenticate against the mock server
pub async fn authenticated_session() -> (Session<MockTransport>, MockServer, MockConnection) {
    authenticated_session_with(test_config()).await
}

pub async fn authenticated_session_with(
    config: StreamConfig,
) -> (Session<MockTransport>, MockServer, MockConnection) {
    let (session, server) = session_with(config);
    session.connect().await.expect("connect");
    let mut connection = server.next_connection().await;
    connection.accept_auth().await;
    wait_for_state(&session, ConnectionState::Authenticated).await;
    (session, server, connection)
}
