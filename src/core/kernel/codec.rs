use crate::core::errors::StreamError;
use tokio_tungstenite::tungstenite::Message;

/// Codec trait for converting between raw WebSocket messages and typed
/// protocol messages
pub trait WsCodec: Send + Sync + 'static {
    /// Outbound request type
    type Request;

    /// The type representing parsed inbound messages
    type Message: Send + Sync;

    /// Encode a request into a WebSocket message ready to be sent
    fn encode_request(&self, request: &Self::Request) -> Result<Message, StreamError>;

    /// Decode a raw WebSocket message into a typed message
    ///
    /// Control messages (ping, pong, close) are handled at the transport level.
    ///
    /// # Returns
    /// - `Ok(Some(message))` - Successfully decoded message
    /// - `Ok(None)` - Message was ignored by the codec
    /// - `Err(error)` - Failed to decode message
    fn decode_message(&self, message: Message) -> Result<Option<Self::Message>, StreamError>;
}
