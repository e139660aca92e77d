//! Streaming Connection Manager
//!
//! Owns one persistent streaming connection: connect, authenticate,
//! subscribe, keep alive, reconnect with full subscription replay, and
//! dispatch parsed messages to the application in arrival order.
//!
//! # Tasks
//!
//! ```text
//!                    ┌──────────────┐  frames   ┌───────────┐  ParsedMessage
//!  exchange socket ─►│  connection  │──────────►│   drain   │───────────────► MessageHandler
//!                    │    task      │  (queue)  │   task    │
//!                    └──────▲───────┘           └───────────┘
//!            send/subscribe │
//!                           │
//!                      manager API
//! ```
//!
//! The connection task is the only owner of the socket. Every other caller
//! reaches it through a command channel. Keep-alive ticks and silence
//! detection run inside the connection task. The drain task outlives a
//! [`restart`](StreamingConnectionManager::restart).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;

use super::message_queue::{MessageQueue, PushOutcome};
use super::recorder::StreamMetricsRecorder;
use crate::application::ports::{Connection, ConnectionStateListener, MessageHandler};
use crate::application::strategy_set::StreamingStrategySet;
use crate::domain::connection::{ConnectionContext, ConnectionState, ReconnectionPolicy};
use crate::domain::error::{TransportError, TransportResult};
use crate::domain::message::{
    InboundFrame, MessageKind, OutboundMessage, ParsedMessage, RawFrame, SubscriptionAction,
    SubscriptionParams,
};
use crate::domain::metrics::PerformanceMetrics;
use crate::infrastructure::config::StreamingSettings;
use crate::infrastructure::heartbeat::{HeartbeatConfig, HeartbeatEvent, KeepAlive};
use crate::infrastructure::metrics::{self, Outcome};

const COMMAND_BUFFER: usize = 64;
/// Bound on closing a socket that already failed.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// =============================================================================
// Subscription Set
// =============================================================================

/// Ordered, de-duplicated subscription set.
#[derive(Debug, Default, Clone)]
struct SubscriptionSet {
    items: Vec<String>,
    channels: Vec<String>,
}

impl SubscriptionSet {
    fn replace(&mut self, items: Vec<String>, channels: Vec<String>) {
        self.items.clear();
        self.add(&items);
        self.channels = channels;
    }

    fn add(&mut self, items: &[String]) {
        for item in items {
            if !self.items.contains(item) {
                self.items.push(item.clone());
            }
        }
    }

    fn remove(&mut self, items: &[String]) {
        self.items.retain(|existing| !items.contains(existing));
    }

    fn params(&self) -> SubscriptionParams {
        SubscriptionParams::with_channels(self.channels.clone())
    }
}

// =============================================================================
// Connection Task Plumbing
// =============================================================================

enum Command {
    Send {
        frame: OutboundMessage,
        ack: oneshot::Sender<TransportResult<()>>,
    },
}

enum LoopEvent {
    Shutdown,
    Command(Command),
    KeepAliveTick,
    Frame(TransportResult<RawFrame>),
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn join_task(name: &'static str, mut handle: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(())) => tracing::debug!(task = name, "Task stopped"),
        Ok(Err(e)) => tracing::error!(task = name, error = %e, "Task terminated abnormally"),
        Err(_) => {
            tracing::error!(
                task = name,
                timeout_ms = timeout.as_millis(),
                "Shutdown anomaly: task did not stop in time, aborting"
            );
            handle.abort();
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

struct Shared {
    context: ConnectionContext,
    strategies: StreamingStrategySet,
    policy: ReconnectionPolicy,
    heartbeat_payload: Option<OutboundMessage>,
    settings: StreamingSettings,
    handler: Arc<dyn MessageHandler>,
    listener: Option<Arc<dyn ConnectionStateListener>>,
    state: RwLock<ConnectionState>,
    subscriptions: RwLock<SubscriptionSet>,
    commands: RwLock<Option<mpsc::Sender<Command>>>,
    queue: MessageQueue,
    metrics: StreamMetricsRecorder,
    reconnect_attempt: AtomicU32,
    error_reported: AtomicBool,
    cancel: CancellationToken,
}

impl Shared {
    fn new(
        context: ConnectionContext,
        strategies: StreamingStrategySet,
        policy: ReconnectionPolicy,
        heartbeat_payload: Option<OutboundMessage>,
        settings: StreamingSettings,
        handler: Arc<dyn MessageHandler>,
        listener: Option<Arc<dyn ConnectionStateListener>>,
    ) -> Self {
        Self {
            queue: MessageQueue::new(settings.queue_capacity),
            metrics: StreamMetricsRecorder::new(settings.hft_latency_budget, settings.latency_window),
            context,
            strategies,
            policy,
            heartbeat_payload,
            settings,
            handler,
            listener,
            state: RwLock::new(ConnectionState::Disconnected),
            subscriptions: RwLock::new(SubscriptionSet::default()),
            commands: RwLock::new(None),
            reconnect_attempt: AtomicU32::new(0),
            error_reported: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    fn rebuild(
        &self,
        settings: StreamingSettings,
        listener: Option<Arc<dyn ConnectionStateListener>>,
    ) -> Self {
        Self::new(
            self.context.clone(),
            self.strategies.clone(),
            self.policy.clone(),
            self.heartbeat_payload.clone(),
            settings,
            Arc::clone(&self.handler),
            listener,
        )
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn not_connected(&self) -> TransportError {
        TransportError::NotConnected {
            state: self.state(),
        }
    }

    /// Apply a lifecycle transition. Shutdown states only move forward and
    /// `Error` is left only by shutdown or a restart.
    fn transition(&self, next: ConnectionState) -> bool {
        let previous = {
            let mut state = self.state.write();
            let current = *state;
            let allowed = current != next
                && match current {
                    ConnectionState::Closed => false,
                    ConnectionState::Closing => next == ConnectionState::Closed,
                    ConnectionState::Error => matches!(
                        next,
                        ConnectionState::Connecting
                            | ConnectionState::Closing
                            | ConnectionState::Closed
                    ),
                    _ => true,
                };
            if !allowed {
                return false;
            }
            *state = next;
            current
        };

        metrics::set_connection_state(next);
        tracing::info!(previous = %previous, current = %next, "Connection state changed");
        if let Some(listener) = &self.listener {
            listener.on_state_change(previous, next);
        }
        true
    }

    fn enter_error(&self, error: TransportError) {
        if self.transition(ConnectionState::Error) && !self.error_reported.swap(true, Ordering::SeqCst)
        {
            tracing::error!(error = %error, "Streaming connection failed permanently");
            if let Some(listener) = &self.listener {
                listener.on_error(&error);
            }
        }
    }

    /// Zero the attempt counter if `error` is the policy's abnormal closure.
    fn reset_on_abnormal_closure(&self, error: &TransportError) {
        if self.policy.reset_on_abnormal_closure
            && error.close_code() == Some(self.policy.abnormal_closure_code)
        {
            self.reconnect_attempt.store(0, Ordering::SeqCst);
            tracing::debug!("Abnormal closure, reconnection attempts reset");
        }
    }

    fn subscription_snapshot(&self) -> (Vec<String>, SubscriptionParams) {
        let subscriptions = self.subscriptions.read();
        (subscriptions.items.clone(), subscriptions.params())
    }

    fn apply_subscription_change(
        &self,
        action: SubscriptionAction,
        items: &[String],
    ) -> SubscriptionParams {
        let mut subscriptions = self.subscriptions.write();
        match action {
            SubscriptionAction::Subscribe => subscriptions.add(items),
            SubscriptionAction::Unsubscribe => subscriptions.remove(items),
        }
        subscriptions.params()
    }

    // -------------------------------------------------------------------------
    // Establishment
    // -------------------------------------------------------------------------

    /// Connect, authenticate if required, and send the full subscription set.
    async fn establish(&self) -> TransportResult<Box<dyn Connection>> {
        let timeout = self.context.connect_timeout;
        let mut conn = tokio::time::timeout(timeout, self.strategies.connection.connect(&self.context))
            .await
            .map_err(|_| TransportError::timeout("connect", timeout))??;

        if let Err(error) = self.handshake(conn.as_mut()).await {
            if let Err(close_error) = tokio::time::timeout(CLOSE_GRACE, conn.close())
                .await
                .unwrap_or(Ok(()))
            {
                tracing::debug!(error = %close_error, "Failed to close half-open connection");
            }
            return Err(error);
        }
        Ok(conn)
    }

    async fn handshake(&self, conn: &mut dyn Connection) -> TransportResult<()> {
        if self.context.requires_auth {
            let timeout = self.context.connect_timeout;
            let accepted = tokio::time::timeout(
                timeout,
                self.strategies.connection.authenticate(conn, &self.context),
            )
            .await
            .map_err(|_| TransportError::timeout("authenticate", timeout))?
            .map_err(|error| {
                if error.kind().is_transient() {
                    error
                } else {
                    TransportError::AuthenticationFailed(error.to_string())
                }
            })?;
            if !accepted {
                return Err(TransportError::AuthenticationFailed(
                    "credentials rejected".to_string(),
                ));
            }
            tracing::debug!("Authenticated");
        }

        let (items, params) = self.subscription_snapshot();
        if items.is_empty() {
            return Ok(());
        }
        let frames =
            self.strategies
                .subscription
                .build_messages(SubscriptionAction::Subscribe, &items, &params)?;
        for frame in frames {
            conn.send(frame).await?;
        }
        tracing::debug!(subscriptions = items.len(), "Subscriptions sent");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Connection Task
    // -------------------------------------------------------------------------

    async fn run_connection(
        self: Arc<Self>,
        mut conn: Box<dyn Connection>,
        mut commands: mpsc::Receiver<Command>,
    ) {
        let mut keepalive = self.heartbeat_payload.as_ref().map(|_| {
            let config = HeartbeatConfig::new(self.context.ping_interval, self.context.ping_timeout);
            KeepAlive::new(config, Instant::now())
        });
        let mut ticker = keepalive.as_ref().map(KeepAlive::ticker);

        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => LoopEvent::Shutdown,
                command = commands.recv() => command.map_or(LoopEvent::Shutdown, LoopEvent::Command),
                () = next_tick(&mut ticker) => LoopEvent::KeepAliveTick,
                frame = conn.next_frame() => LoopEvent::Frame(frame),
            };

            let failure = match event {
                LoopEvent::Shutdown => break,
                LoopEvent::Command(Command::Send { frame, ack }) => {
                    let result = conn.send(frame).await;
                    let failure = result.as_ref().err().cloned();
                    let _ = ack.send(result);
                    failure
                }
                LoopEvent::KeepAliveTick => self
                    .keepalive_tick(conn.as_mut(), keepalive.as_mut())
                    .await
                    .err(),
                LoopEvent::Frame(Ok(raw)) => {
                    if let Some(keepalive) = keepalive.as_mut() {
                        keepalive.record_activity(Instant::now());
                    }
                    self.enqueue(raw);
                    None
                }
                LoopEvent::Frame(Err(error)) => Some(error),
            };

            if let Some(error) = failure {
                conn = match self.recover(conn, error).await {
                    Some(restored) => restored,
                    None => return,
                };
                if let Some(keepalive) = keepalive.as_mut() {
                    keepalive.record_activity(Instant::now());
                }
                if let Some(ticker) = ticker.as_mut() {
                    ticker.reset();
                }
            }
        }

        match tokio::time::timeout(CLOSE_GRACE, conn.close()).await {
            Ok(Ok(())) => tracing::debug!("Socket closed"),
            Ok(Err(e)) => tracing::debug!(error = %e, "Socket close reported an error"),
            Err(_) => tracing::warn!("Socket close timed out"),
        }
    }

    async fn keepalive_tick(
        &self,
        conn: &mut dyn Connection,
        keepalive: Option<&mut KeepAlive>,
    ) -> TransportResult<()> {
        let (Some(keepalive), Some(payload)) = (keepalive, &self.heartbeat_payload) else {
            return Ok(());
        };
        match keepalive.on_tick(Instant::now()) {
            HeartbeatEvent::Timeout => Err(TransportError::HeartbeatTimeout(self.context.ping_timeout)),
            HeartbeatEvent::SendPing => {
                conn.send(payload.clone()).await?;
                keepalive.mark_ping_sent();
                tracing::trace!("Keep-alive sent");
                Ok(())
            }
        }
    }

    fn enqueue(&self, raw: RawFrame) {
        metrics::record_message_received();
        let outcome = self.queue.push(InboundFrame::new(raw));
        if outcome != PushOutcome::Queued {
            metrics::record_messages_dropped(1);
            let dropped = self.queue.dropped_count();
            if dropped == 1 || dropped % 1000 == 0 {
                tracing::warn!(
                    dropped,
                    capacity = self.queue.capacity(),
                    ?outcome,
                    "Inbound queue full, dropping frames"
                );
            }
        }
    }

    /// Restore the connection after `error`. Returns `None` when giving up
    /// or shutting down; the failed socket is closed either way.
    async fn recover(
        &self,
        mut conn: Box<dyn Connection>,
        error: TransportError,
    ) -> Option<Box<dyn Connection>> {
        let _ = tokio::time::timeout(CLOSE_GRACE, conn.close()).await;
        drop(conn);
        if self.cancel.is_cancelled() {
            return None;
        }

        self.metrics.record_error();
        tracing::warn!(
            error = %error,
            close_code = ?error.close_code(),
            "Streaming connection lost"
        );
        self.transition(ConnectionState::Reconnecting);

        if !self.strategies.connection.should_reconnect(&error) {
            self.enter_error(error);
            return None;
        }

        self.reset_on_abnormal_closure(&error);

        let mut last_error = error;
        loop {
            let attempt = self.reconnect_attempt.load(Ordering::SeqCst);
            if attempt >= self.policy.max_attempts {
                self.enter_error(TransportError::ReconnectExhausted {
                    attempts: attempt,
                    last_error: last_error.to_string(),
                });
                return None;
            }

            let delay = self.policy.delay_for_attempt(attempt);
            tracing::info!(
                attempt = attempt + 1,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis(),
                "Reconnecting"
            );
            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            self.reconnect_attempt.store(attempt + 1, Ordering::SeqCst);
            let result = tokio::select! {
                () = self.cancel.cancelled() => return None,
                result = self.establish() => result,
            };

            match result {
                Ok(mut restored) => {
                    self.reconnect_attempt.store(0, Ordering::SeqCst);
                    self.metrics.record_reconnection();
                    metrics::record_reconnect(Outcome::Success);
                    if !self.transition(ConnectionState::Connected) {
                        let _ = tokio::time::timeout(CLOSE_GRACE, restored.close()).await;
                        return None;
                    }
                    tracing::info!(
                        subscriptions = self.subscription_snapshot().0.len(),
                        "Reconnected and resubscribed"
                    );
                    return Some(restored);
                }
                Err(error) => {
                    metrics::record_reconnect(Outcome::Failure);
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %error,
                        "Reconnection attempt failed"
                    );
                    if !self.strategies.connection.should_reconnect(&error) {
                        self.enter_error(error);
                        return None;
                    }
                    self.reset_on_abnormal_closure(&error);
                    last_error = error;
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Drain Task
    // -------------------------------------------------------------------------

    async fn run_drain(self: Arc<Self>) {
        let poll = self.settings.queue_poll_interval;
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                frame = self.queue.pop_timeout(poll) => frame,
            };
            let Some(frame) = next else { continue };
            self.dispatch_frame(frame).await;
            self.queue.task_done();
        }
        tracing::debug!("Drain task stopped");
    }

    async fn dispatch_frame(&self, frame: InboundFrame) {
        let started = Instant::now();
        match self.strategies.parser.parse(&frame) {
            Ok(Some(message)) => {
                let kind = message.kind;
                let received_at = message.received_at;
                observe(&message);
                self.handler.on_message(message).await;

                let latency = started.elapsed();
                if !self.metrics.record_processed(latency, received_at) {
                    metrics::record_budget_violation();
                    tracing::trace!(
                        kind = kind.as_str(),
                        latency_us = latency.as_micros(),
                        "Message exceeded latency budget"
                    );
                }
                metrics::record_message_dispatched(kind, latency);
            }
            Ok(None) => tracing::trace!("Frame carried nothing to dispatch"),
            Err(error) => {
                self.metrics.record_parse_error();
                metrics::record_parse_error();
                tracing::warn!(error = %error, bytes = frame.raw.len(), "Failed to parse frame");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    async fn send_command(&self, frame: OutboundMessage) -> TransportResult<()> {
        let sender = self.commands.read().clone();
        let sender = sender.ok_or_else(|| self.not_connected())?;
        let timeout = self.settings.send_timeout;

        let (ack, done) = oneshot::channel();
        let delivered = tokio::time::timeout(timeout, async {
            sender
                .send(Command::Send { frame, ack })
                .await
                .map_err(|_| self.not_connected())?;
            done.await.map_err(|_| self.not_connected())?
        })
        .await;
        delivered.map_err(|_| TransportError::timeout("send", timeout))?
    }

    async fn change_subscriptions(
        &self,
        action: SubscriptionAction,
        items: Vec<String>,
    ) -> TransportResult<()> {
        let state = self.state();
        if !matches!(
            state,
            ConnectionState::Connected | ConnectionState::Reconnecting
        ) {
            return Err(TransportError::NotConnected { state });
        }

        let params = self.apply_subscription_change(action, &items);
        if items.is_empty() {
            return Ok(());
        }
        if state == ConnectionState::Reconnecting {
            tracing::debug!(
                ?action,
                items = items.len(),
                "Subscription change deferred to reconnect replay"
            );
            return Ok(());
        }

        let frames = self
            .strategies
            .subscription
            .build_messages(action, &items, &params)?;
        for frame in frames {
            self.send_command(frame).await?;
        }
        tracing::debug!(?action, items = items.len(), "Subscription change sent");
        Ok(())
    }
}

fn observe(message: &ParsedMessage) {
    match message.kind {
        MessageKind::Heartbeat => tracing::trace!("Exchange heartbeat received"),
        MessageKind::SubscriptionAck => {
            tracing::debug!(stream_id = ?message.stream_id, "Subscription acknowledged");
        }
        MessageKind::Error => {
            tracing::warn!(
                stream_id = ?message.stream_id,
                payload = %message.payload,
                "Exchange reported an error"
            );
        }
        MessageKind::Orderbook
        | MessageKind::Trade
        | MessageKind::Ticker
        | MessageKind::Balance
        | MessageKind::Order
        | MessageKind::Unclassified => {}
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Manages one persistent streaming connection.
///
/// # Example
///
/// ```rust,ignore
/// let manager = StreamingConnectionManager::new(context, strategies, handler)?;
/// manager
///     .initialize(vec!["BTCUSDT".into(), "ETHUSDT".into()], vec!["trade".into()])
///     .await?;
/// // ... messages arrive on the handler ...
/// manager.close().await?;
/// ```
pub struct StreamingConnectionManager {
    shared: Arc<Shared>,
    connection_task: Mutex<Option<JoinHandle<()>>>,
    drain_task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    close_started: AtomicBool,
}

impl StreamingConnectionManager {
    /// Create a manager with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Strategy`] if the strategies' reconnection
    /// policy or keep-alive configuration is invalid for `context`.
    pub fn new(
        context: ConnectionContext,
        strategies: StreamingStrategySet,
        handler: Arc<dyn MessageHandler>,
    ) -> TransportResult<Self> {
        let (policy, heartbeat_payload) = strategies.resolve(&context)?;
        let shared = Shared::new(
            context,
            strategies,
            policy,
            heartbeat_payload,
            StreamingSettings::default(),
            handler,
            None,
        );
        Ok(Self::from_shared(shared))
    }

    fn from_shared(shared: Shared) -> Self {
        Self {
            shared: Arc::new(shared),
            connection_task: Mutex::new(None),
            drain_task: Mutex::new(None),
            started: AtomicBool::new(false),
            close_started: AtomicBool::new(false),
        }
    }

    /// Replace the tuning settings. Call before [`initialize`](Self::initialize).
    #[must_use]
    pub fn with_settings(self, settings: StreamingSettings) -> Self {
        let listener = self.shared.listener.clone();
        Self::from_shared(self.shared.rebuild(settings, listener))
    }

    /// Attach a lifecycle listener. Call before [`initialize`](Self::initialize).
    #[must_use]
    pub fn with_state_listener(self, listener: Arc<dyn ConnectionStateListener>) -> Self {
        let settings = self.shared.settings.clone();
        Self::from_shared(self.shared.rebuild(settings, Some(listener)))
    }

    /// Connect, authenticate, subscribe, and start the background tasks.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyInitialized`] on a second call, or the
    /// establishment failure, in which case the state is
    /// [`ConnectionState::Error`] and no socket is left open.
    pub async fn initialize(
        &self,
        subscriptions: Vec<String>,
        channels: Vec<String>,
    ) -> TransportResult<()> {
        if self.close_started.load(Ordering::SeqCst) {
            return Err(self.shared.not_connected());
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyInitialized);
        }

        let shared = &self.shared;
        shared.subscriptions.write().replace(subscriptions, channels);
        shared.transition(ConnectionState::Connecting);
        tracing::info!(url = %shared.context.url, "Initializing streaming connection");
        self.start().await
    }

    /// Start over after the connection entered [`ConnectionState::Error`].
    ///
    /// Connects again with the current subscription set and a fresh
    /// reconnection budget. The next terminal failure is reported to the
    /// listener again.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyInitialized`] while the connection is
    /// live, [`TransportError::NotConnected`] before
    /// [`initialize`](Self::initialize) or after [`close`](Self::close), or
    /// the establishment failure, in which case the state is
    /// [`ConnectionState::Error`] again.
    pub async fn restart(&self) -> TransportResult<()> {
        let shared = &self.shared;
        if self.close_started.load(Ordering::SeqCst) {
            return Err(shared.not_connected());
        }
        match shared.state() {
            ConnectionState::Error => {}
            ConnectionState::Disconnected | ConnectionState::Closing | ConnectionState::Closed => {
                return Err(shared.not_connected());
            }
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting => return Err(TransportError::AlreadyInitialized),
        }

        shared.reconnect_attempt.store(0, Ordering::SeqCst);
        shared.error_reported.store(false, Ordering::SeqCst);
        if !shared.transition(ConnectionState::Connecting) {
            return Err(shared.not_connected());
        }

        let previous = self.connection_task.lock().take();
        if let Some(previous) = previous {
            join_task("connection", previous, shared.settings.shutdown_timeout).await;
        }
        tracing::info!(url = %shared.context.url, "Restarting streaming connection");
        self.start().await
    }

    /// Establish from `Connecting` and spawn the connection task. The drain
    /// task is spawned once and kept across restarts.
    async fn start(&self) -> TransportResult<()> {
        let shared = &self.shared;
        let mut conn = match shared.establish().await {
            Ok(conn) => conn,
            Err(error) => {
                shared.metrics.record_error();
                shared.enter_error(error.clone());
                return Err(error);
            }
        };
        if shared.cancel.is_cancelled() {
            let _ = tokio::time::timeout(CLOSE_GRACE, conn.close()).await;
            return Err(TransportError::Shutdown);
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        *shared.commands.write() = Some(command_tx);
        shared.transition(ConnectionState::Connected);

        let connection = tokio::spawn(Arc::clone(shared).run_connection(conn, command_rx));
        *self.connection_task.lock() = Some(connection);

        let mut drain = self.drain_task.lock();
        if drain.is_none() {
            *drain = Some(tokio::spawn(Arc::clone(shared).run_drain()));
        }
        Ok(())
    }

    /// Add `items` to the subscription set and send subscribe frames for
    /// all of them.
    ///
    /// While reconnecting the set is updated and the replay delivers it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] unless connected or
    /// reconnecting, or the send failure.
    pub async fn subscribe(&self, items: Vec<String>) -> TransportResult<()> {
        self.shared
            .change_subscriptions(SubscriptionAction::Subscribe, items)
            .await
    }

    /// Remove `items` from the subscription set and send unsubscribe frames.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn unsubscribe(&self, items: Vec<String>) -> TransportResult<()> {
        self.shared
            .change_subscriptions(SubscriptionAction::Unsubscribe, items)
            .await
    }

    /// Send an out-of-band control frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] unless connected, or the send
    /// failure.
    pub async fn send_message(&self, payload: OutboundMessage) -> TransportResult<()> {
        let state = self.shared.state();
        if state != ConnectionState::Connected {
            return Err(TransportError::NotConnected { state });
        }
        self.shared.send_command(payload).await
    }

    /// Shut down: stop every task, discard queued frames, close the socket.
    ///
    /// Idempotent; later calls return `Ok(())` immediately.
    ///
    /// # Errors
    ///
    /// Currently infallible; shutdown anomalies are logged.
    pub async fn close(&self) -> TransportResult<()> {
        if self.close_started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Close already requested");
            return Ok(());
        }

        let shared = &self.shared;
        shared.transition(ConnectionState::Closing);
        tracing::info!("Closing streaming connection");
        shared.cancel.cancel();
        shared.commands.write().take();

        let timeout = shared.settings.shutdown_timeout;
        let connection = self.connection_task.lock().take();
        if let Some(connection) = connection {
            join_task("connection", connection, timeout).await;
        }
        let drain = self.drain_task.lock().take();
        if let Some(drain) = drain {
            join_task("drain", drain, timeout).await;
        }

        let discarded = shared.queue.drain();
        if discarded > 0 {
            tracing::info!(discarded, "Discarded queued frames on shutdown");
        }
        shared.transition(ConnectionState::Closed);
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn get_connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Performance snapshot.
    #[must_use]
    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        self.shared
            .metrics
            .snapshot(self.shared.queue.dropped_count())
    }

    /// Current subscription set, in insertion order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.subscription_snapshot().0
    }

    /// Reconnection attempts made since the last successful connection.
    #[must_use]
    pub fn reconnect_attempt(&self) -> u32 {
        self.shared.reconnect_attempt.load(Ordering::SeqCst)
    }

    /// Frames waiting to be dispatched.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.shared.queue.len()
    }

    /// The resolved reconnection policy.
    #[must_use]
    pub fn reconnection_policy(&self) -> &ReconnectionPolicy {
        &self.shared.policy
    }
}

impl Drop for StreamingConnectionManager {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}
