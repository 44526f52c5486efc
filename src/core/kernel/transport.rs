use crate::core::errors::StreamError;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument};

pub type BoxedSink = Box<dyn FrameSink>;
pub type BoxedSource = Box<dyn FrameSource>;

/// Duplex message channel the session runs over
///
/// A connection is handed out as two halves so the single reader and the
/// serialized writer never contend with each other.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `url`
    async fn connect(&self, url: &str) -> Result<(BoxedSink, BoxedSource), StreamError>;
}

/// Write half of a connection
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, message: Message) -> Result<(), StreamError>;

    async fn close(&mut self) -> Result<(), StreamError>;
}

/// Read half of a connection
#[async_trait]
pub trait FrameSource: Send {
    /// Next data frame
    ///
    /// # Returns
    /// - `Some(Ok(message))` - A text or binary frame
    /// - `Some(Err(error))` - The connection failed
    /// - `None` - The remote closed the connection
    async fn next_frame(&mut self) -> Option<Result<Message, StreamError>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Tungstenite-based transport
#[derive(Debug, Clone, Default)]
pub struct TungsteniteTransport {
    headers: HashMap<String, String>,
}

impl TungsteniteTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extra headers for the HTTP upgrade request, e.g. signed handshake headers
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    #[instrument(skip(self), fields(header_count = self.headers.len()))]
    async fn connect(&self, url: &str) -> Result<(BoxedSink, BoxedSource), StreamError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| StreamError::ConnectFailed(format!("Invalid WebSocket URL: {}", e)))?;

        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                StreamError::ConnectFailed(format!("Invalid header name '{}': {}", name, e))
            })?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| StreamError::ConnectFailed(format!("Invalid header value: {}", e)))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, _) = connect_async(request).await.map_err(|e| {
            StreamError::ConnectFailed(format!("WebSocket connection failed: {}", e))
        })?;

        let (write, read) = ws_stream.split();
        Ok((
            Box::new(TungsteniteSink { write }),
            Box::new(TungsteniteSource { read }),
        ))
    }
}

struct TungsteniteSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for TungsteniteSink {
    async fn send(&mut self, message: Message) -> Result<(), StreamError> {
        self.write.send(message).await.map_err(|e| {
            StreamError::TransportError(format!("Failed to send WebSocket message: {}", e))
        })
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        // the peer may already be gone; closing is best effort
        let _ = self.write.send(Message::Close(None)).await;
        self.write
            .close()
            .await
            .map_err(|e| StreamError::TransportError(format!("Failed to close WebSocket: {}", e)))
    }
}

struct TungsteniteSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for TungsteniteSource {
    async fn next_frame(&mut self) -> Option<Result<Message, StreamError>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket closed by server");
                    return None;
                }
                // pongs are queued by tungstenite itself while reading
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(message) => return Some(Ok(message)),
                Err(e) => {
                    return Some(Err(StreamError::TransportError(format!(
                        "WebSocket error: {}",
                        e
                    ))))
                }
            }
        }
    }
}
