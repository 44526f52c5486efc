use crate::core::errors::StreamError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Lifecycle state of a single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    Closing,
}

impl ConnectionState {
    /// States in which the transport is open
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Authenticating | Self::Authenticated
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Quantity levels a price subscription is quoted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantitySpec {
    pub token: String,
    pub levels: Vec<Decimal>,
}

impl QuantitySpec {
    pub fn new(token: impl Into<String>, levels: Vec<Decimal>) -> Self {
        Self {
            token: token.into(),
            levels,
        }
    }
}

/// Account metadata that can be requested with a data request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataRequestType {
    MaxLevels,
    AllowedMarkets,
    MaxConnections,
    Other(String),
}

impl DataRequestType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::MaxLevels => "max_levels",
            Self::AllowedMarkets => "allowed_markets",
            Self::MaxConnections => "max_connections",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for DataRequestType {
    fn from(value: &str) -> Self {
        match value {
            "max_levels" => Self::MaxLevels,
            "allowed_markets" => Self::AllowedMarkets,
            "max_connections" => Self::MaxConnections,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Serialize for DataRequestType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Signature entry of the auth frame; deployments disagree on the key name.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub enum AuthSignature {
    #[serde(rename = "signature")]
    Signature(String),
    #[serde(rename = "sign")]
    Sign(String),
}

impl fmt::Debug for AuthSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signature(_) => f.write_str("Signature([REDACTED])"),
            Self::Sign(_) => f.write_str("Sign([REDACTED])"),
        }
    }
}

#[derive(Clone, Serialize)]
pub struct AuthRequest {
    pub api_key: String,
    pub passphrase: String,
    #[serde(flatten)]
    pub signature: AuthSignature,
    pub timestamp: i64,
    pub request_id: String,
}

impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("api_key", &self.api_key)
            .field("passphrase", &"[REDACTED]")
            .field("signature", &self.signature)
            .field("timestamp", &self.timestamp)
            .field("request_id", &self.request_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest {
    pub base_token: String,
    pub quote_token: String,
    pub quantity: QuantitySpec,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsubscribeRequest {
    pub base_token: String,
    pub quote_token: String,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataRequest {
    pub request_type: DataRequestType,
    pub request_id: String,
}

/// Outbound frames, tagged on the wire by `action`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    Auth(AuthRequest),
    Subscribe(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
    DataRequest(DataRequest),
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::DataRequest(_) => "data_request",
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Self::Auth(r) => &r.request_id,
            Self::Subscribe(r) => &r.request_id,
            Self::Unsubscribe(r) => &r.request_id,
            Self::DataRequest(r) => &r.request_id,
        }
    }
}

/// Inbound frame kind, keyed by the `event` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    Auth,
    Subscribe,
    Unsubscribe,
    Data,
    Stream,
    Error,
    Unknown(String),
}

impl ResponseKind {
    pub fn from_event(event: &str) -> Self {
        match event {
            "auth_response" => Self::Auth,
            "subscribe_response" => Self::Subscribe,
            "unsubscribe_response" => Self::Unsubscribe,
            "data_response" => Self::Data,
            "stream" => Self::Stream,
            "error_response" => Self::Error,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_event(&self) -> &str {
        match self {
            Self::Auth => "auth_response",
            Self::Subscribe => "subscribe_response",
            Self::Unsubscribe => "unsubscribe_response",
            Self::Data => "data_response",
            Self::Stream => "stream",
            Self::Error => "error_response",
            Self::Unknown(event) => event,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    /// Anything other than `success`, carrying the raw status
    Failure(String),
}

impl ResponseStatus {
    pub fn from_wire(status: Option<&str>) -> Self {
        match status {
            Some(s) if s.eq_ignore_ascii_case("success") => Self::Success,
            Some(s) => Self::Failure(s.to_string()),
            None => Self::Failure("missing".to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub kind: ResponseKind,
    pub status: ResponseStatus,
    pub request_id: Option<String>,
    pub body: Value,
    pub error: Option<Value>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Parse a stream body into typed price rows.
    ///
    /// The service sends an array of rows; a bare object is accepted as a
    /// single row.
    pub fn price_updates(&self) -> Result<Vec<PriceUpdate>, StreamError> {
        let parsed = match &self.body {
            Value::Array(_) => serde_json::from_value::<Vec<PriceUpdate>>(self.body.clone()),
            Value::Object(_) => {
                serde_json::from_value::<PriceUpdate>(self.body.clone()).map(|row| vec![row])
            }
            other => {
                return Err(StreamError::MalformedMessage(format!(
                    "stream body is not a price update: {}",
                    other
                )))
            }
        };

        parsed.map_err(|e| StreamError::MalformedMessage(format!("invalid price update: {}", e)))
    }
}

/// One quoted level of a price stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub t_create: i64,
    pub quantity: Decimal,
    pub quantity_token: String,
    #[serde(default)]
    pub sell_price: Option<Decimal>,
    #[serde(default)]
    pub buy_price: Option<Decimal>,
    pub base_token: String,
    pub quote_token: String,
}

/// A price subscription the caller wants kept alive across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub base_token: String,
    pub quote_token: String,
    pub quantity: QuantitySpec,
    pub request_id: String,
}

impl Subscription {
    /// New subscription with a generated request id
    pub fn new(
        base_token: impl Into<String>,
        quote_token: impl Into<String>,
        quantity: QuantitySpec,
    ) -> Self {
        Self {
            base_token: base_token.into(),
            quote_token: quote_token.into(),
            quantity,
            request_id: generate_request_id(),
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn is_pair(&self, base_token: &str, quote_token: &str) -> bool {
        self.base_token == base_token && self.quote_token == quote_token
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base_token, self.quote_token)
    }
}

/// Random correlation id for requests the caller did not name.
pub fn generate_request_id() -> String {
    format!("fx_{:016x}", rand::random::<u64>())
}

/// Caller-visible outcome of connection activity and inbound frames.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Authenticated(Response),
    AuthenticationFailed(Response),
    ConnectFailed { reason: String },
    ConnectionLost { reason: String },
    SubscribeResult(Response),
    UnsubscribeResult(Response),
    DataResult(Response),
    StreamData(Response),
    Error(Response),
    /// Frame with an `event` tag this client does not know
    Unknown(Response),
    MalformedMessage { reason: String, raw: String },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticated(_) => "authenticated",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::SubscribeResult(_) => "subscribe_result",
            Self::UnsubscribeResult(_) => "unsubscribe_result",
            Self::DataResult(_) => "data_result",
            Self::StreamData(_) => "stream_data",
            Self::Error(_) => "error",
            Self::Unknown(_) => "unknown",
            Self::MalformedMessage { .. } => "malformed_message",
        }
    }
}

/// Connection-level signals, published separately from the data events so a
/// supervisor never loses them behind a burst of stream frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Authenticated,
    AuthenticationFailed,
    ConnectFailed,
    ConnectionLost,
    Closed,
}
