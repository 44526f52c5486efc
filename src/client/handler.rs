use crate::core::types::{Response, SessionEvent};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Typed callbacks for session events.
///
/// Every method has a no-op default, so a handler only implements what it
/// cares about. Callbacks run on the task that drives the receiver, never on
/// the session's read loop.
pub trait EventHandler: Send {
    fn on_authenticated(&mut self, _response: &Response) {}

    fn on_authentication_failed(&mut self, _response: &Response) {}

    fn on_connect_failed(&mut self, _reason: &str) {}

    fn on_connection_lost(&mut self, _reason: &str) {}

    fn on_subscribe_result(&mut self, _response: &Response) {}

    fn on_unsubscribe_result(&mut self, _response: &Response) {}

    fn on_data_result(&mut self, _response: &Response) {}

    /// Price stream frames, both successful and failed ones
    fn on_stream(&mut self, _response: &Response) {}

    fn on_error(&mut self, _response: &Response) {}

    fn on_unknown(&mut self, _response: &Response) {}

    fn on_malformed(&mut self, _reason: &str, _raw: &str) {}

    /// The receiver fell behind and `skipped` events were dropped
    fn on_lagged(&mut self, skipped: u64) {
        warn!(skipped, "Event handler lagged, oldest events dropped");
    }

    fn handle(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Authenticated(response) => self.on_authenticated(response),
            SessionEvent::AuthenticationFailed(response) => self.on_authentication_failed(response),
            SessionEvent::ConnectFailed { reason } => self.on_connect_failed(reason),
            SessionEvent::ConnectionLost { reason } => self.on_connection_lost(reason),
            SessionEvent::SubscribeResult(response) => self.on_subscribe_result(response),
            SessionEvent::UnsubscribeResult(response) => self.on_unsubscribe_result(response),
            SessionEvent::DataResult(response) => self.on_data_result(response),
            SessionEvent::StreamData(response) => self.on_stream(response),
            SessionEvent::Error(response) => self.on_error(response),
            SessionEvent::Unknown(response) => self.on_unknown(response),
            SessionEvent::MalformedMessage { reason, raw } => self.on_malformed(reason, raw),
        }
    }
}

/// Feed events into `handler` in arrival order until the session is dropped
pub async fn drive<H: EventHandler + ?Sized>(
    mut events: broadcast::Receiver<SessionEvent>,
    handler: &mut H,
) {
    loop {
        match events.recv().await {
            Ok(event) => handler.handle(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => handler.on_lagged(skipped),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Event stream closed");
}
