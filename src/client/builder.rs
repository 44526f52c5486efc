use crate::client::reconnect::{ReconnectPolicy, Reconnector};
use crate::client::session::Session;
use crate::core::config::{
    ConfigError, ConnectionOptions, Credentials, Endpoint, SignatureField, SignaturePayload,
    StreamConfig,
};
use crate::core::errors::StreamError;
use crate::core::kernel::transport::{Transport, TungsteniteTransport};
use std::time::Duration;

/// Builder for sessions and reconnectors
///
/// Credentials and an endpoint must be supplied before building, either
/// directly or through `with_config`.
#[derive(Debug, Default)]
pub struct SessionBuilder {
    endpoint: Option<Endpoint>,
    credentials: Option<Credentials>,
    options: ConnectionOptions,
    reconnect_policy: ReconnectPolicy,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.endpoint = Some(config.endpoint);
        self.credentials = Some(config.credentials);
        self.options = config.options;
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set API credentials; `secret_key` is base64
    pub fn with_credentials(
        mut self,
        api_key: String,
        secret_key: String,
        passphrase: String,
    ) -> Self {
        self.credentials = Some(Credentials::new(api_key, secret_key, passphrase));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.options.send_timeout = Some(timeout);
        self
    }

    /// Events buffered per receiver before the oldest are dropped
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.options.event_capacity = capacity;
        self
    }

    pub fn with_signature_payload(mut self, payload: SignaturePayload) -> Self {
        self.options.signature_payload = payload;
        self
    }

    pub fn with_signature_field(mut self, field: SignatureField) -> Self {
        self.options.signature_field = field;
        self
    }

    /// Log every price stream frame at debug level
    pub fn with_log_streams(mut self, log_streams: bool) -> Self {
        self.options.log_streams = log_streams;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    /// Build a session over a caller-supplied transport
    pub fn build_with_transport<T: Transport>(
        self,
        transport: T,
    ) -> Result<Session<T>, StreamError> {
        let endpoint = self.endpoint.ok_or_else(|| {
            ConfigError::InvalidConfiguration("endpoint is required".to_string())
        })?;
        let credentials = self.credentials.ok_or_else(|| {
            ConfigError::InvalidConfiguration("credentials are required".to_string())
        })?;

        Session::new(
            StreamConfig::new(endpoint, credentials).with_options(self.options),
            transport,
        )
    }

    /// Build a session over `tokio-tungstenite`
    pub fn build(self) -> Result<Session<TungsteniteTransport>, StreamError> {
        self.build_with_transport(TungsteniteTransport::new())
    }

    /// Build a session and a reconnector supervising it
    pub fn build_with_reconnection(
        self,
    ) -> Result<(Session<TungsteniteTransport>, Reconnector<TungsteniteTransport>), StreamError> {
        self.build_reconnecting_with_transport(TungsteniteTransport::new())
    }

    pub fn build_reconnecting_with_transport<T: Transport>(
        self,
        transport: T,
    ) -> Result<(Session<T>, Reconnector<T>), StreamError> {
        let policy = self.reconnect_policy.clone();
        let session = self.build_with_transport(transport)?;
        let reconnector = Reconnector::new(session.clone(), policy);
        Ok((session, reconnector))
    }
}

/// Create a new builder
pub fn builder() -> SessionBuilder {
    SessionBuilder::new()
}
