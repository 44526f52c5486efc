use crate::client::session::Session;
use crate::core::errors::StreamError;
use crate::core::kernel::transport::Transport;
use crate::core::types::{ConnectionState, Lifecycle, Subscription};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Delay schedule between reconnect attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles from `initial` on every attempt, never above `max`
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay before the given 1-based attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential { initial, max } => {
                let factor = 1u32
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                initial.checked_mul(factor).unwrap_or(max).min(max)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Fixed(Duration::from_secs(1))
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub backoff: Backoff,
    /// Attempts per outage; `None` retries until stopped
    pub max_attempts: Option<u32>,
    /// How long to wait for the auth response on each attempt
    pub auth_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            max_attempts: None,
            auth_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    #[must_use]
    pub fn with_auth_timeout(mut self, auth_timeout: Duration) -> Self {
        self.auth_timeout = auth_timeout;
        self
    }
}

/// Keeps a session alive and its subscriptions in place.
///
/// The reconnector owns the desired subscription set. After an unexpected
/// disconnect it reconnects with backoff, waits for authentication and replays
/// every declared subscription. A rejected authentication disarms it until
/// [`Reconnector::rearm`] is called.
pub struct Reconnector<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for Reconnector<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<T: Transport> {
    session: Session<T>,
    policy: ReconnectPolicy,
    desired: RwLock<Vec<Subscription>>,
    attempts: AtomicU32,
    total_attempts: AtomicU32,
    armed: AtomicBool,
    wake: Notify,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> Reconnector<T> {
    pub fn new(session: Session<T>, policy: ReconnectPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                session,
                policy,
                desired: RwLock::new(Vec::new()),
                attempts: AtomicU32::new(0),
                total_attempts: AtomicU32::new(0),
                armed: AtomicBool::new(true),
                wake: Notify::new(),
                supervisor: Mutex::new(None),
            }),
        }
    }

    pub fn session(&self) -> &Session<T> {
        &self.shared.session
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.shared.policy
    }

    /// Reconnect attempts made since this reconnector was created
    pub fn attempts(&self) -> u32 {
        self.shared.total_attempts.load(Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        self.shared.armed.load(Ordering::SeqCst)
    }

    /// Add a subscription to the replay set, replacing one for the same pair
    pub async fn declare(&self, subscription: Subscription) {
        let mut desired = self.shared.desired.write().await;
        match desired
            .iter_mut()
            .find(|s| s.is_pair(&subscription.base_token, &subscription.quote_token))
        {
            Some(existing) => *existing = subscription,
            None => desired.push(subscription),
        }
    }

    /// Remove a pair from the replay set
    pub async fn withdraw(&self, base_token: &str, quote_token: &str) -> Option<Subscription> {
        let mut desired = self.shared.desired.write().await;
        let index = desired
            .iter()
            .position(|s| s.is_pair(base_token, quote_token))?;
        Some(desired.remove(index))
    }

    pub async fn desired(&self) -> Vec<Subscription> {
        self.shared.desired.read().await.clone()
    }

    /// Declare a subscription and send it now if the session is authenticated.
    ///
    /// While disconnected the subscription is only recorded; it goes out with
    /// the next successful reconnect.
    pub async fn subscribe(&self, subscription: Subscription) -> Result<(), StreamError> {
        self.declare(subscription.clone()).await;
        if self.shared.session.state() != ConnectionState::Authenticated {
            debug!(pair = %subscription, "Not authenticated, subscription deferred");
            return Ok(());
        }
        self.shared.session.subscribe_to(&subscription).await
    }

    /// Withdraw a pair and send the unsubscribe frame if the session is
    /// authenticated.
    ///
    /// The frame goes out whether or not the pair was declared. Returns
    /// `Ok(false)` when nothing was sent because the session is not
    /// authenticated; the pair is still withdrawn from the replay set.
    pub async fn unsubscribe(
        &self,
        base_token: &str,
        quote_token: &str,
        request_id: &str,
    ) -> Result<bool, StreamError> {
        if self.withdraw(base_token, quote_token).await.is_none() {
            debug!(base_token, quote_token, "Unsubscribing from undeclared pair");
        }
        if self.shared.session.state() != ConnectionState::Authenticated {
            return Ok(false);
        }
        self.shared
            .session
            .unsubscribe(base_token, quote_token, request_id)
            .await?;
        Ok(true)
    }

    /// Connect, wait for authentication and replay the desired subscriptions
    pub async fn establish(&self) -> Result<(), StreamError> {
        self.shared.establish().await
    }

    /// Re-enable recovery after an authentication failure and try right away
    pub fn rearm(&self) {
        info!("Reconnector re-armed");
        self.shared.attempts.store(0, Ordering::SeqCst);
        self.shared.armed.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }

    /// Spawn the supervisor task; a second call is a no-op
    pub async fn start(&self) {
        let mut supervisor = self.shared.supervisor.lock().await;
        if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        // subscribe before spawning so no signal is missed
        let lifecycle = self.shared.session.lifecycle();
        *supervisor = Some(tokio::spawn(supervise(
            Arc::clone(&self.shared),
            lifecycle,
        )));
        debug!("Reconnect supervisor started");
    }

    /// Stop the supervisor; the session itself stays as it is
    pub async fn stop(&self) {
        if let Some(task) = self.shared.supervisor.lock().await.take() {
            task.abort();
            debug!("Reconnect supervisor stopped");
        }
    }

    /// Stop the supervisor and close the session
    pub async fn shutdown(&self) -> Result<(), StreamError> {
        self.stop().await;
        self.shared.session.close().await
    }
}

impl<T: Transport> Shared<T> {
    fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    fn disarm(&self, reason: &str) {
        if self.armed.swap(false, Ordering::SeqCst) {
            warn!(reason, "Reconnector disarmed");
        }
    }

    #[instrument(skip(self), fields(url = %self.session.endpoint().url()))]
    async fn establish(&self) -> Result<(), StreamError> {
        self.session
            .connect_authenticated(self.policy.auth_timeout)
            .await?;

        let desired = self.desired.read().await.clone();
        for subscription in &desired {
            let result = self.session.subscribe_to(subscription).await;
            if let Err(StreamError::NotAuthenticated { state }) = result {
                return Err(StreamError::TransportError(format!(
                    "connection {} during subscription replay",
                    state
                )));
            }
            result?;
        }
        self.attempts.store(0, Ordering::SeqCst);
        info!(subscriptions = desired.len(), "Session established");
        Ok(())
    }

    async fn recover(&self) {
        while self.is_armed() {
            let attempt = self.attempts.load(Ordering::SeqCst) + 1;
            if let Some(max) = self.policy.max_attempts {
                if attempt > max {
                    error!(max, "Giving up after {} reconnect attempts", max);
                    self.disarm("reconnect attempts exhausted");
                    return;
                }
            }
            self.attempts.store(attempt, Ordering::SeqCst);
            self.total_attempts.fetch_add(1, Ordering::SeqCst);

            let delay = self.policy.backoff.delay(attempt);
            info!(attempt, ?delay, "Reconnecting");
            tokio::time::sleep(delay).await;
            if !self.is_armed() {
                return;
            }

            match self.establish().await {
                Ok(()) => {
                    info!(attempt, "Reconnected");
                    return;
                }
                Err(StreamError::InvalidState(state)) => {
                    debug!(state = %state, "Session already active, stopping recovery");
                    return;
                }
                Err(e) if !e.is_transient() => {
                    self.disarm(&e.to_string());
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                    if self.session.state() != ConnectionState::Disconnected {
                        if let Err(e) = self.session.close().await {
                            debug!(error = %e, "Failed to reset session");
                        }
                    }
                }
            }
        }
    }
}

async fn supervise<T: Transport>(
    shared: Arc<Shared<T>>,
    mut lifecycle: broadcast::Receiver<Lifecycle>,
) {
    loop {
        let recover = tokio::select! {
            signal = lifecycle.recv() => match signal {
                Ok(Lifecycle::ConnectionLost | Lifecycle::ConnectFailed) => true,
                Ok(Lifecycle::AuthenticationFailed) => {
                    shared.disarm("authentication rejected");
                    false
                }
                Ok(Lifecycle::Authenticated | Lifecycle::Closed) => false,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Supervisor lagged behind lifecycle signals");
                    true
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shared.wake.notified() => true,
        };

        if recover && shared.is_armed() && shared.session.state() == ConnectionState::Disconnected
        {
            shared.recover().await;
            // signals raised by our own attempts are stale now
            lifecycle = lifecycle.resubscribe();
            if shared.is_armed() && shared.session.state() == ConnectionState::Disconnected {
                shared.wake.notify_one();
            }
        }
    }
    debug!("Reconnect supervisor finished");
}
