use crate::client::dispatcher::{Dispatch, Dispatcher, Transition};
use crate::core::config::{ConfigError, Endpoint, SignatureField, StreamConfig};
use crate::core::errors::StreamError;
use crate::core::kernel::codec::WsCodec;
use crate::core::kernel::signer::{HmacSigner, Signer, SIGN_METHOD};
use crate::core::kernel::transport::{BoxedSink, BoxedSource, Transport};
use crate::core::types::{
    AuthRequest, AuthSignature, ConnectionState, DataRequest, DataRequestType, Lifecycle,
    QuantitySpec, Request, SessionEvent, SubscribeRequest, Subscription, UnsubscribeRequest,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const LIFECYCLE_CAPACITY: usize = 64;

/// Frame counters for one session, across all of its connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub malformed_frames: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    malformed_frames: AtomicU64,
}

/// One authenticated streaming connection and its state machine.
///
/// `Session` is a cheap handle; clones share the same connection. Sends are
/// serialized through a single writer, inbound frames are read by one task per
/// connection and published in arrival order on [`Session::events`].
pub struct Session<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.inner.config.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct Inner<T: Transport> {
    config: StreamConfig,
    transport: T,
    signer: HmacSigner,
    dispatcher: Dispatcher,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
    lifecycle: broadcast::Sender<Lifecycle>,
    // tagged with the connection generation that owns it
    writer: Mutex<Option<(u64, BoxedSink)>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
    counters: Counters,
}

impl<T: Transport> Session<T> {
    /// Build a session; the secret key is decoded here so a bad key never
    /// reaches the wire
    pub fn new(config: StreamConfig, transport: T) -> Result<Self, StreamError> {
        if !config.credentials.is_complete() {
            return Err(ConfigError::InvalidConfiguration(
                "api key, secret key and passphrase are all required".to_string(),
            )
            .into());
        }
        if config.options.event_capacity == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "event capacity must be greater than zero".to_string(),
            )
            .into());
        }

        let signer = HmacSigner::new(&config.credentials)?;
        let dispatcher = Dispatcher::new(config.options.log_streams);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(config.options.event_capacity);
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                signer,
                dispatcher,
                state,
                events,
                lifecycle,
                writer: Mutex::new(None),
                reader: Mutex::new(None),
                generation: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.config.endpoint
    }

    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Observe state changes; the latest state is always visible
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Subscribe to caller-visible events.
    ///
    /// The buffer is bounded: a receiver that falls more than
    /// `event_capacity` events behind loses the oldest ones and sees
    /// `RecvError::Lagged`. The read loop itself never waits on receivers.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe to connection-level signals only
    pub fn lifecycle(&self) -> broadcast::Receiver<Lifecycle> {
        self.inner.lifecycle.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        let counters = &self.inner.counters;
        SessionStats {
            frames_sent: counters.frames_sent.load(Ordering::Relaxed),
            frames_received: counters.frames_received.load(Ordering::Relaxed),
            malformed_frames: counters.malformed_frames.load(Ordering::Relaxed),
        }
    }

    /// Open the transport and send the signed auth frame.
    ///
    /// Resolves once the connection is open and the auth frame is written;
    /// the auth outcome arrives later as an event. Use
    /// [`Session::connect_authenticated`] to wait for it.
    #[instrument(skip(self), fields(url = %self.inner.config.endpoint.url()))]
    pub async fn connect(&self) -> Result<(), StreamError> {
        let inner = &self.inner;
        let Some(generation) = inner.begin_connect() else {
            return Err(StreamError::InvalidState(self.state()));
        };

        let url = inner.config.endpoint.url();
        let limit = inner.config.options.connect_timeout;
        info!(generation, "Connecting");

        let (sink, source) = match tokio::time::timeout(limit, inner.transport.connect(&url)).await
        {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => return Err(inner.fail_connect(generation, e.to_string())),
            Err(_) => {
                return Err(inner.fail_connect(
                    generation,
                    format!("no connection within {:?}", limit),
                ))
            }
        };

        if !inner.install_writer(generation, sink).await {
            return Err(StreamError::ConnectFailed(
                "session closed while connecting".to_string(),
            ));
        }
        info!(generation, "Connected");

        let handle = tokio::spawn(read_loop(Arc::clone(inner), source, generation));
        if let Some(previous) = inner.reader.lock().await.replace(handle) {
            previous.abort();
        }

        inner.authenticate(generation).await
    }

    /// Connect and wait until the service accepts or rejects the credentials
    pub async fn connect_authenticated(&self, limit: Duration) -> Result<(), StreamError> {
        let mut lifecycle = self.lifecycle();
        self.connect().await?;

        let outcome = tokio::time::timeout(limit, async {
            loop {
                match lifecycle.recv().await {
                    Ok(Lifecycle::Authenticated) => return Ok(()),
                    Ok(Lifecycle::AuthenticationFailed) => {
                        return Err(StreamError::AuthenticationFailed(
                            "credentials rejected by the service".to_string(),
                        ))
                    }
                    Ok(Lifecycle::ConnectionLost) => {
                        return Err(StreamError::TransportError(
                            "connection lost during authentication".to_string(),
                        ))
                    }
                    Ok(Lifecycle::Closed) => {
                        return Err(StreamError::InvalidState(ConnectionState::Disconnected))
                    }
                    Ok(Lifecycle::ConnectFailed) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.state() == ConnectionState::Authenticated {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(StreamError::TransportError("session dropped".to_string()))
                    }
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(?limit, "No auth response, dropping connection");
                self.close().await?;
                Err(StreamError::Timeout(format!(
                    "no auth response within {:?}",
                    limit
                )))
            }
        }
    }

    /// Subscribe to a price stream for `base_token/quote_token`
    #[instrument(skip_all, fields(pair = tracing::field::Empty))]
    pub async fn subscribe(
        &self,
        base_token: impl Into<String>,
        quote_token: impl Into<String>,
        quantity: QuantitySpec,
        request_id: impl Into<String>,
    ) -> Result<(), StreamError> {
        let request = SubscribeRequest {
            base_token: base_token.into(),
            quote_token: quote_token.into(),
            quantity,
            request_id: request_id.into(),
        };
        tracing::Span::current().record(
            "pair",
            format!("{}/{}", request.base_token, request.quote_token).as_str(),
        );
        self.inner
            .send_authenticated(Request::Subscribe(request))
            .await
    }

    /// Send the subscribe frame for a declared subscription
    pub async fn subscribe_to(&self, subscription: &Subscription) -> Result<(), StreamError> {
        self.subscribe(
            subscription.base_token.clone(),
            subscription.quote_token.clone(),
            subscription.quantity.clone(),
            subscription.request_id.clone(),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn unsubscribe(
        &self,
        base_token: &str,
        quote_token: &str,
        request_id: &str,
    ) -> Result<(), StreamError> {
        let request = UnsubscribeRequest {
            base_token: base_token.to_string(),
            quote_token: quote_token.to_string(),
            request_id: request_id.to_string(),
        };
        self.inner
            .send_authenticated(Request::Unsubscribe(request))
            .await
    }

    /// Request account metadata such as `max_levels` or `allowed_markets`
    #[instrument(skip(self, request_type, request_id))]
    pub async fn fetch_data(
        &self,
        request_type: impl Into<DataRequestType>,
        request_id: impl Into<String>,
    ) -> Result<(), StreamError> {
        let request = DataRequest {
            request_type: request_type.into(),
            request_id: request_id.into(),
        };
        self.inner
            .send_authenticated(Request::DataRequest(request))
            .await
    }

    /// Release the transport. Calling it on a closed session is a no-op.
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<(), StreamError> {
        let inner = &self.inner;
        let mut previous = ConnectionState::Disconnected;
        let closing = inner.state.send_if_modified(|state| {
            previous = *state;
            if matches!(
                *state,
                ConnectionState::Disconnected | ConnectionState::Closing
            ) {
                return false;
            }
            // invalidates the read loop and any handshake in flight
            inner.generation.fetch_add(1, Ordering::SeqCst);
            *state = ConnectionState::Closing;
            true
        });

        if !closing {
            debug!(state = %previous, "Close requested on inactive session");
            return Ok(());
        }
        info!(from = %previous, "Closing session");

        if let Some(reader) = inner.reader.lock().await.take() {
            reader.abort();
        }
        let sink = inner.writer.lock().await.take();
        if let Some((_, mut sink)) = sink {
            if let Err(e) = sink.close().await {
                warn!(error = %e, "Transport did not close cleanly");
            }
        }

        inner.state.send_replace(ConnectionState::Disconnected);
        inner.signal(Lifecycle::Closed);
        Ok(())
    }
}

impl<T: Transport> Inner<T> {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Compare-and-set on the state, scoped to one connection generation
    fn advance(&self, generation: u64, from: &[ConnectionState], to: ConnectionState) -> bool {
        self.advance_if(generation, |state| from.contains(&state), to)
    }

    fn advance_if(
        &self,
        generation: u64,
        allowed: impl Fn(ConnectionState) -> bool,
        to: ConnectionState,
    ) -> bool {
        self.state.send_if_modified(|state| {
            if !self.is_current(generation) || !allowed(*state) {
                return false;
            }
            debug!(from = %state, to = %to, generation, "State transition");
            *state = to;
            true
        })
    }

    fn begin_connect(&self) -> Option<u64> {
        let mut generation = None;
        self.state.send_if_modified(|state| {
            if *state != ConnectionState::Disconnected {
                return false;
            }
            generation = Some(self.generation.fetch_add(1, Ordering::SeqCst) + 1);
            *state = ConnectionState::Connecting;
            true
        });
        generation
    }

    fn fail_connect(&self, generation: u64, reason: String) -> StreamError {
        if self.advance(
            generation,
            &[ConnectionState::Connecting],
            ConnectionState::Disconnected,
        ) {
            warn!(reason = %reason, "Connection failed");
            self.publish(SessionEvent::ConnectFailed {
                reason: reason.clone(),
            });
            self.signal(Lifecycle::ConnectFailed);
        }
        StreamError::ConnectFailed(reason)
    }

    async fn install_writer(&self, generation: u64, mut sink: BoxedSink) -> bool {
        let mut writer = self.writer.lock().await;
        if self.advance(
            generation,
            &[ConnectionState::Connecting],
            ConnectionState::Connected,
        ) {
            *writer = Some((generation, sink));
            return true;
        }
        drop(writer);

        if let Err(e) = sink.close().await {
            debug!(error = %e, "Failed to close abandoned connection");
        }
        false
    }

    async fn authenticate(&self, generation: u64) -> Result<(), StreamError> {
        if !self.advance(
            generation,
            &[ConnectionState::Connected],
            ConnectionState::Authenticating,
        ) {
            return Err(StreamError::ConnectFailed(
                "connection dropped before authentication".to_string(),
            ));
        }

        let request = match self.auth_request() {
            Ok(request) => request,
            Err(e) => {
                self.advance(
                    generation,
                    &[ConnectionState::Authenticating],
                    ConnectionState::Disconnected,
                );
                self.release_writer(generation).await;
                return Err(e);
            }
        };

        self.write(&request).await?;
        info!(generation, "Sent auth request");
        Ok(())
    }

    fn auth_request(&self) -> Result<Request, StreamError> {
        let options = &self.config.options;
        let credentials = &self.config.credentials;
        let timestamp = chrono::Utc::now().timestamp();

        let message = options.signature_payload.resolve(&self.config.endpoint);
        let signature = self.signer.sign_message(timestamp, SIGN_METHOD, message)?;
        let signature = match options.signature_field {
            SignatureField::Signature => AuthSignature::Signature(signature),
            SignatureField::Sign => AuthSignature::Sign(signature),
        };

        Ok(Request::Auth(AuthRequest {
            api_key: credentials.api_key().to_string(),
            passphrase: credentials.passphrase().to_string(),
            signature,
            timestamp,
            request_id: options.auth_request_id.clone(),
        }))
    }

    async fn send_authenticated(&self, request: Request) -> Result<(), StreamError> {
        let state = *self.state.borrow();
        if state != ConnectionState::Authenticated {
            warn!(action = request.action(), state = %state, "Not authenticated, request not sent");
            return Err(StreamError::NotAuthenticated { state });
        }
        self.write(&request).await
    }

    /// Serialized write of one request on the current connection
    async fn write(&self, request: &Request) -> Result<(), StreamError> {
        let message = self.dispatcher.codec().encode_request(request)?;

        let mut writer = self.writer.lock().await;
        let Some((generation, sink)) = writer.as_mut() else {
            return Err(StreamError::TransportError(
                "connection is not open".to_string(),
            ));
        };
        let generation = *generation;

        let result = match self.config.options.send_timeout {
            Some(limit) => match tokio::time::timeout(limit, sink.send(message)).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(StreamError::Timeout(format!(
                        "{} not written within {:?}",
                        request.action(),
                        limit
                    )))
                }
            },
            None => sink.send(message).await,
        };
        drop(writer);

        match result {
            Ok(()) => {
                self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                debug!(
                    action = request.action(),
                    request_id = request.request_id(),
                    "Sent request"
                );
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.lose_connection(generation, reason.clone()).await;
                Err(StreamError::TransportError(reason))
            }
        }
    }

    async fn release_writer(&self, generation: u64) {
        let sink = {
            let mut writer = self.writer.lock().await;
            match writer.as_ref() {
                Some((owner, _)) if *owner == generation => writer.take(),
                _ => None,
            }
        };

        if let Some((_, mut sink)) = sink {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Failed to close transport");
            }
        }
    }

    async fn lose_connection(&self, generation: u64, reason: String) {
        if !self.advance_if(
            generation,
            ConnectionState::is_live,
            ConnectionState::Disconnected,
        ) {
            return;
        }
        warn!(reason = %reason, generation, "Connection lost");
        self.release_writer(generation).await;
        self.publish(SessionEvent::ConnectionLost { reason });
        self.signal(Lifecycle::ConnectionLost);
    }

    /// Apply one routed frame; returns false when the read loop must stop
    async fn apply(&self, generation: u64, dispatch: Dispatch) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        if matches!(dispatch.event, SessionEvent::MalformedMessage { .. }) {
            self.counters.malformed_frames.fetch_add(1, Ordering::Relaxed);
        }

        match dispatch.transition {
            None => {
                self.publish(dispatch.event);
                true
            }
            Some(Transition::Authenticated) => {
                let advanced = self.advance(
                    generation,
                    &[ConnectionState::Authenticating],
                    ConnectionState::Authenticated,
                );
                self.publish(dispatch.event);
                if advanced {
                    self.signal(Lifecycle::Authenticated);
                } else {
                    warn!(state = %*self.state.borrow(), "Auth response outside of authentication");
                }
                true
            }
            Some(Transition::AuthenticationFailed) => {
                if !self.advance(
                    generation,
                    &[ConnectionState::Authenticating],
                    ConnectionState::Disconnected,
                ) {
                    warn!(state = %*self.state.borrow(), "Auth failure outside of authentication");
                    let event = match dispatch.event {
                        SessionEvent::AuthenticationFailed(response) => {
                            SessionEvent::Error(response)
                        }
                        other => other,
                    };
                    self.publish(event);
                    return true;
                }
                self.release_writer(generation).await;
                self.publish(dispatch.event);
                self.signal(Lifecycle::AuthenticationFailed);
                false
            }
        }
    }

    fn publish(&self, event: SessionEvent) {
        // Err only means nobody is subscribed yet
        let _ = self.events.send(event);
    }

    fn signal(&self, signal: Lifecycle) {
        let _ = self.lifecycle.send(signal);
    }
}

async fn read_loop<T: Transport>(inner: Arc<Inner<T>>, mut source: BoxedSource, generation: u64) {
    loop {
        match source.next_frame().await {
            Some(Ok(message)) => {
                inner
                    .counters
                    .frames_received
                    .fetch_add(1, Ordering::Relaxed);
                let Some(dispatch) = inner.dispatcher.dispatch(message) else {
                    continue;
                };
                if !inner.apply(generation, dispatch).await {
                    break;
                }
            }
            Some(Err(e)) => {
                inner.lose_connection(generation, e.to_string()).await;
                break;
            }
            None => {
                inner
                    .lose_connection(generation, "connection closed by remote".to_string())
                    .await;
                break;
            }
        }
    }
    debug!(generation, "Read loop finished");
}
