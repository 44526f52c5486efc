use crate::core::errors::StreamError;
use crate::core::kernel::codec::WsCodec;
use crate::core::types::{Request, Response, ResponseKind, ResponseStatus};
use serde::Deserialize;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

/// Inbound frame as it appears on the wire; only `event` is required
#[derive(Debug, Deserialize)]
struct WireResponse {
    event: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    request_id: Option<Value>,
    #[serde(default)]
    body: Value,
    #[serde(default)]
    error: Option<Value>,
}

impl From<WireResponse> for Response {
    fn from(wire: WireResponse) -> Self {
        let request_id = wire.request_id.and_then(|id| match id {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        });

        Self {
            kind: ResponseKind::from_event(&wire.event),
            status: ResponseStatus::from_wire(wire.status.as_deref()),
            request_id,
            body: wire.body,
            error: wire.error.filter(|e| !e.is_null()),
        }
    }
}

/// JSON text-frame codec for the price stream protocol
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamCodec;

impl StreamCodec {
    pub fn new() -> Self {
        Self
    }

    /// Parse one JSON document into a response
    pub fn decode_text(&self, text: &str) -> Result<Response, StreamError> {
        let wire: WireResponse = serde_json::from_str(text)
            .map_err(|e| StreamError::MalformedMessage(format!("Failed to parse frame: {}", e)))?;
        Ok(wire.into())
    }
}

impl WsCodec for StreamCodec {
    type Request = Request;
    type Message = Response;

    fn encode_request(&self, request: &Request) -> Result<Message, StreamError> {
        let text = serde_json::to_string(request)?;
        Ok(Message::Text(text))
    }

    fn decode_message(&self, message: Message) -> Result<Option<Response>, StreamError> {
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(data) => String::from_utf8(data).map_err(|e| {
                StreamError::MalformedMessage(format!("Invalid UTF-8 in binary message: {}", e))
            })?,
            _ => return Ok(None),
        };

        self.decode_text(&text).map(Some)
    }
}
