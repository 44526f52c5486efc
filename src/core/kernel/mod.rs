/// Kernel - transport, signing and codec seams
///
/// The kernel holds the pieces that know nothing about the stream protocol's
/// state machine: how bytes move, how a handshake is signed, and the contract
/// for turning frames into typed messages.
///
/// # Architecture
///
/// ## Transport Layer
/// - `Transport`: opens a connection and hands back split halves
/// - `FrameSink` / `FrameSource`: serialized writer and single reader
/// - `TungsteniteTransport`: `tokio-tungstenite` implementation
///
/// ## Authentication
/// - `sign`: HMAC-SHA256 over `timestamp || method || message`
/// - `Signer`: pluggable signing interface
/// - `HmacSigner`: decoded-once key, auth frames and handshake headers
///
/// ## Message Handling
/// - `WsCodec`: protocol-specific encoding/decoding
///
/// # Example
/// ```rust,no_run
/// use fxstream::core::config::Credentials;
/// use fxstream::core::kernel::*;
/// use std::collections::HashMap;
///
/// # fn example() -> Result<(), fxstream::StreamError> {
/// let credentials = Credentials::new(
///     "api_key".to_string(),
///     "c2VjcmV0".to_string(),
///     "passphrase".to_string(),
/// );
/// let signer = HmacSigner::new(&credentials)?;
/// let headers: HashMap<String, String> =
///     signer.handshake_headers(chrono::Utc::now().timestamp(), "/socket.io/")?;
/// let _transport = TungsteniteTransport::new().with_headers(headers);
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod signer;
pub mod transport;

pub use codec::WsCodec;
pub use signer::{sign, HmacSigner, Signer, SIGN_METHOD};
pub use transport::{
    BoxedSink, BoxedSource, FrameSink, FrameSource, Transport, TungsteniteTransport,
};
