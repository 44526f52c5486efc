use crate::client::codec::StreamCodec;
use crate::core::kernel::codec::WsCodec;
use crate::core::types::{Response, ResponseKind, SessionEvent};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const RAW_PREVIEW_LIMIT: usize = 512;

/// State change requested by an inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `Authenticating -> Authenticated`
    Authenticated,
    /// `Authenticating -> Disconnected`, transport released
    AuthenticationFailed,
}

/// Routing decision for one inbound frame
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub transition: Option<Transition>,
    pub event: SessionEvent,
}

impl Dispatch {
    fn emit(event: SessionEvent) -> Self {
        Self {
            transition: None,
            event,
        }
    }
}

/// Decodes frames and decides where each one goes.
///
/// Routing is pure: the session applies the returned transition and publishes
/// the event, so the table below can be tested without a connection.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    codec: StreamCodec,
    log_streams: bool,
}

impl Dispatcher {
    pub fn new(log_streams: bool) -> Self {
        Self {
            codec: StreamCodec::new(),
            log_streams,
        }
    }

    pub fn codec(&self) -> &StreamCodec {
        &self.codec
    }

    /// Decode one raw frame; `Ok(None)` for frames that carry no data
    pub fn decode(&self, message: Message) -> Result<Option<Response>, crate::StreamError> {
        self.codec.decode_message(message)
    }

    /// Decode and route one raw frame.
    ///
    /// A frame that fails to decode becomes a `MalformedMessage` event; it
    /// never ends the read loop.
    pub fn dispatch(&self, message: Message) -> Option<Dispatch> {
        let raw = raw_preview(&message);
        match self.decode(message) {
            Ok(Some(response)) => Some(self.route(response)),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                Some(Dispatch::emit(SessionEvent::MalformedMessage {
                    reason: e.to_string(),
                    raw,
                }))
            }
        }
    }

    /// Map a decoded response to its transition and caller-visible event
    pub fn route(&self, response: Response) -> Dispatch {
        match response.kind {
            ResponseKind::Auth => {
                if response.is_success() {
                    info!(request_id = ?response.request_id, "Authentication successful");
                    Dispatch {
                        transition: Some(Transition::Authenticated),
                        event: SessionEvent::Authenticated(response),
                    }
                } else {
                    warn!(
                        status = ?response.status,
                        body = %response.body,
                        "Authentication failed"
                    );
                    Dispatch {
                        transition: Some(Transition::AuthenticationFailed),
                        event: SessionEvent::AuthenticationFailed(response),
                    }
                }
            }
            ResponseKind::Subscribe => {
                log_result("subscribe", &response);
                Dispatch::emit(SessionEvent::SubscribeResult(response))
            }
            ResponseKind::Unsubscribe => {
                log_result("unsubscribe", &response);
                Dispatch::emit(SessionEvent::UnsubscribeResult(response))
            }
            ResponseKind::Data => {
                log_result("data_request", &response);
                Dispatch::emit(SessionEvent::DataResult(response))
            }
            ResponseKind::Stream => {
                if self.log_streams {
                    debug!(status = ?response.status, body = %response.body, "Price stream");
                }
                Dispatch::emit(SessionEvent::StreamData(response))
            }
            ResponseKind::Error => {
                warn!(body = %response.body, error = ?response.error, "Error response received");
                Dispatch::emit(SessionEvent::Error(response))
            }
            ResponseKind::Unknown(ref event) => {
                debug!(event = %event, "Unknown event");
                Dispatch::emit(SessionEvent::Unknown(response))
            }
        }
    }
}

fn log_result(action: &str, response: &Response) {
    if response.is_success() {
        debug!(action, request_id = ?response.request_id, "Request succeeded");
    } else {
        warn!(
            action,
            request_id = ?response.request_id,
            status = ?response.status,
            body = %response.body,
            "Request failed"
        );
    }
}

fn raw_preview(message: &Message) -> String {
    let text = match message {
        Message::Text(text) => text.clone(),
        Message::Binary(data) => String::from_utf8_lossy(data).into_owned(),
        _ => return String::new(),
    };

    if text.len() <= RAW_PREVIEW_LIMIT {
        return text;
    }
    let mut end = RAW_PREVIEW_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
