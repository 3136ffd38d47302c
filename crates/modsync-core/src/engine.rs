//! Connection state machine for the assignments socket.
//!
//! The [`Engine`] owns everything about the single shared connection except
//! the I/O itself: its phase, the consumer registry, the outbound queue, and
//! the current [`AssignmentsState`]. Every input (a facade call, a socket
//! event, a timer firing) returns the list of [`Effect`]s the executor must
//! perform, in order. The executor in `modsync-client` performs them with
//! tokio; tests drive the engine directly.
//!
//! # Lifecycle
//!
//! ```text
//!              connect()               opened()
//! Disconnected ─────────▶ Connecting ──────────▶ Connected
//!      ▲                      │                      │
//!      │   no endpoint        │ token/endpoint/open  │ closed / errored
//!      ├──────────────────────┤ failure              │
//!      │                      ▼                      ▼
//!      └──── reconnect_due() ◀── ScheduleReconnect ◀─┘
//! ```
//!
//! Each socket attempt gets a fresh [`ConnectionId`]. Events tagged with any
//! other id are stale and ignored, which is how a close event racing an
//! explicit [`Engine::disconnect`] is kept from re-arming the reconnect timer.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

use crate::config::TimingConfig;
use crate::error::SyncError;
use crate::model::{AssignmentsState, QueueId, ReportId};
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::reducer::{self, DEFAULT_REVIEW_PLACEHOLDER_SECS, ReduceContext};
use crate::registry::{ConsumerId, SubscriptionRegistry, UnionChange};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Tag for one physical connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where the shared connection is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the owner wants the connection up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Active,
    Closed,
}

/// Work the executor must carry out after an engine call.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fetch a token and resolve the realtime URL, then report back via
    /// [`Engine::endpoint_resolved`].
    ResolveEndpoint(ConnectionId),
    /// Open the socket, then report [`Engine::opened`] or [`Engine::open_failed`].
    Open { conn: ConnectionId, url: Url },
    /// Write one frame on the live socket.
    Transmit {
        conn: ConnectionId,
        message: ClientMessage,
    },
    /// Close the socket for this attempt. No event should be reported back.
    Close(ConnectionId),
    StartHeartbeat(Duration),
    StopHeartbeat,
    /// Arm the single reconnect timer; report back via [`Engine::reconnect_due`].
    ScheduleReconnect(Duration),
    CancelReconnect,
    /// A new state object exists; notify listeners.
    Publish(Arc<AssignmentsState>),
    PhaseChanged(Phase),
}

/// Timing knobs for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub review_placeholder_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&TimingConfig::default())
    }
}

impl From<&TimingConfig> for EngineConfig {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            heartbeat_interval: timing.heartbeat_interval(),
            reconnect_delay: timing.reconnect_delay(),
            review_placeholder_ttl: timing.review_placeholder_ttl(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    phase: Phase,
    intent: Intent,
    current: Option<ConnectionId>,
    next_conn: u64,
    reconnect_pending: bool,
    outbox: Vec<ClientMessage>,
    registry: SubscriptionRegistry,
    state: Arc<AssignmentsState>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            phase: Phase::Disconnected,
            intent: Intent::Closed,
            current: None,
            next_conn: 0,
            reconnect_pending: false,
            outbox: Vec::new(),
            registry: SubscriptionRegistry::new(),
            state: Arc::new(AssignmentsState::default()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Id of the attempt currently in flight or open.
    #[must_use]
    pub const fn connection(&self) -> Option<ConnectionId> {
        self.current
    }

    #[must_use]
    pub const fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Current immutable state snapshot.
    #[must_use]
    pub fn state(&self) -> Arc<AssignmentsState> {
        Arc::clone(&self.state)
    }

    /// Frames waiting for the next successful open.
    #[must_use]
    pub fn queued(&self) -> &[ClientMessage] {
        &self.outbox
    }

    /// Union of all live consumer declarations.
    #[must_use]
    pub fn subscribed(&self) -> BTreeSet<QueueId> {
        self.registry.union()
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.registry.consumer_count()
    }

    // -----------------------------------------------------------------------
    // Lifecycle inputs
    // -----------------------------------------------------------------------

    /// Bring the connection up. A no-op while connecting or connected.
    pub fn connect(&mut self) -> Vec<Effect> {
        self.intent = Intent::Active;
        if self.phase != Phase::Disconnected {
            return Vec::new();
        }

        let mut effects = Vec::new();
        if self.reconnect_pending {
            self.reconnect_pending = false;
            effects.push(Effect::CancelReconnect);
        }
        self.begin_attempt(&mut effects);
        effects
    }

    /// Tear the connection down and stay down until the next [`Self::connect`].
    pub fn disconnect(&mut self) -> Vec<Effect> {
        self.intent = Intent::Closed;

        let mut effects = Vec::new();
        if self.reconnect_pending {
            self.reconnect_pending = false;
            effects.push(Effect::CancelReconnect);
        }
        if self.phase == Phase::Connected {
            effects.push(Effect::StopHeartbeat);
        }
        if let Some(conn) = self.current.take() {
            tracing::info!(%conn, "closing realtime connection");
            effects.push(Effect::Close(conn));
        }
        self.set_phase(Phase::Disconnected, &mut effects);
        effects
    }

    /// Result of the token fetch plus endpoint resolution for `conn`.
    ///
    /// `Ok(None)` means the service has no realtime endpoint: the engine goes
    /// back to `Disconnected` and does not retry.
    pub fn endpoint_resolved(
        &mut self,
        conn: ConnectionId,
        endpoint: Result<Option<Url>, SyncError>,
    ) -> Vec<Effect> {
        if !self.is_current(conn, Phase::Connecting) {
            return Vec::new();
        }

        match endpoint {
            Ok(Some(url)) => vec![Effect::Open { conn, url }],
            Ok(None) => {
                tracing::info!(%conn, "realtime endpoint unavailable; staying offline");
                let mut effects = Vec::new();
                self.current = None;
                self.set_phase(Phase::Disconnected, &mut effects);
                effects
            }
            Err(err) => self.connection_lost(conn, Some(&err), false),
        }
    }

    /// The socket for `conn` is open.
    ///
    /// Sends the full subscribed union first, then the queued review frames,
    /// then starts the heartbeat.
    pub fn opened(&mut self, conn: ConnectionId) -> Vec<Effect> {
        if !self.is_current(conn, Phase::Connecting) {
            return Vec::new();
        }

        let mut effects = Vec::new();
        self.set_phase(Phase::Connected, &mut effects);

        let union: Vec<QueueId> = self.registry.union().into_iter().collect();
        if !union.is_empty() {
            effects.push(Effect::Transmit {
                conn,
                message: ClientMessage::Subscribe { queues: union },
            });
        }

        let queued = std::mem::take(&mut self.outbox);
        tracing::info!(%conn, queued = queued.len(), "realtime connection open");
        effects.extend(queued.into_iter().map(|message| Effect::Transmit { conn, message }));

        effects.push(Effect::StartHeartbeat(self.config.heartbeat_interval));
        effects
    }

    /// Opening the socket for `conn` failed.
    pub fn open_failed(&mut self, conn: ConnectionId, err: &SyncError) -> Vec<Effect> {
        if !self.is_current(conn, Phase::Connecting) {
            return Vec::new();
        }
        self.connection_lost(conn, Some(err), false)
    }

    /// The peer closed `conn`.
    pub fn closed(&mut self, conn: ConnectionId) -> Vec<Effect> {
        if self.current != Some(conn) {
            return Vec::new();
        }
        self.connection_lost(conn, None, false)
    }

    /// `conn` reported an error. The socket is closed before a retry is armed.
    pub fn errored(&mut self, conn: ConnectionId, err: &SyncError) -> Vec<Effect> {
        if self.current != Some(conn) {
            return Vec::new();
        }
        self.connection_lost(conn, Some(err), true)
    }

    /// The reconnect timer fired.
    pub fn reconnect_due(&mut self) -> Vec<Effect> {
        if !self.reconnect_pending {
            return Vec::new();
        }
        self.reconnect_pending = false;
        if self.intent == Intent::Closed || self.phase != Phase::Disconnected {
            return Vec::new();
        }

        let mut effects = Vec::new();
        self.begin_attempt(&mut effects);
        effects
    }

    /// The heartbeat interval ticked.
    pub fn heartbeat_due(&self) -> Vec<Effect> {
        match (self.phase, self.current) {
            (Phase::Connected, Some(conn)) => vec![Effect::Transmit {
                conn,
                message: ClientMessage::Ping,
            }],
            _ => Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Inbound frames
    // -----------------------------------------------------------------------

    /// A text frame arrived on `conn`.
    pub fn frame(&mut self, conn: ConnectionId, text: &str) -> Vec<Effect> {
        self.frame_at(conn, text, Utc::now())
    }

    /// [`Self::frame`] with an explicit clock.
    pub fn frame_at(&mut self, conn: ConnectionId, text: &str, now: DateTime<Utc>) -> Vec<Effect> {
        if !self.is_current(conn, Phase::Connected) {
            return Vec::new();
        }

        let message = match protocol::decode(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(%conn, error = %err, "dropping undecodable frame");
                return Vec::new();
            }
        };
        self.apply(&message, now)
    }

    /// Fold one decoded server message into state.
    pub fn apply(&mut self, message: &ServerMessage, now: DateTime<Utc>) -> Vec<Effect> {
        match message {
            ServerMessage::Error { message } => {
                tracing::warn!(message = %message, "server reported an error");
            }
            ServerMessage::Unknown => {
                tracing::debug!("ignoring frame of unknown type");
            }
            snapshot if snapshot.is_snapshot() => {
                tracing::debug!(kind = snapshot.kind(), "snapshot received");
            }
            other => tracing::trace!(kind = other.kind(), "frame"),
        }

        let ctx = ReduceContext::at(now).with_placeholder_ttl(self.placeholder_ttl());
        reducer::reduce(&self.state, message, &ctx)
            .map(|next| vec![self.publish(next)])
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Transmit now when connected, otherwise queue for the next open.
    ///
    /// Only review frames are queued, the latest one per report and queue.
    pub fn send(&mut self, message: ClientMessage) -> Vec<Effect> {
        match (self.phase, self.current) {
            (Phase::Connected, Some(conn)) => vec![Effect::Transmit { conn, message }],
            _ => {
                let kind = message.kind();
                if enqueue(&mut self.outbox, message) {
                    tracing::debug!(kind, "queueing frame until connected");
                }
                Vec::new()
            }
        }
    }

    /// Put frames that never reached the socket back in the outbox, ahead of
    /// anything queued since. A target already queued keeps the newer frame.
    pub fn requeue(&mut self, messages: impl IntoIterator<Item = ClientMessage>) {
        let mut older = Vec::new();
        for message in messages {
            enqueue(&mut older, message);
        }
        older.retain(|message| {
            !self
                .outbox
                .iter()
                .any(|newer| newer.review_target() == message.review_target())
        });
        if !older.is_empty() {
            tracing::debug!(count = older.len(), "requeueing unsent frames");
        }
        older.append(&mut self.outbox);
        self.outbox = older;
    }

    pub fn start_review(&mut self, report_id: ReportId, queue_id: Option<QueueId>) -> Vec<Effect> {
        self.send(ClientMessage::ReviewStart {
            report_id,
            queue_id,
        })
    }

    pub fn end_review(&mut self, report_id: ReportId, queue_id: Option<QueueId>) -> Vec<Effect> {
        self.send(ClientMessage::ReviewEnd {
            report_id,
            queue_id,
        })
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    pub fn mount(
        &mut self,
        consumer: ConsumerId,
        queues: impl IntoIterator<Item = QueueId>,
    ) -> Vec<Effect> {
        let change = self.registry.mount(consumer, queues);
        self.union_changed(change)
    }

    pub fn update(
        &mut self,
        consumer: ConsumerId,
        queues: impl IntoIterator<Item = QueueId>,
    ) -> Vec<Effect> {
        let change = self.registry.update(consumer, queues);
        self.union_changed(change)
    }

    pub fn unmount(&mut self, consumer: ConsumerId) -> Vec<Effect> {
        let change = self.registry.unmount(consumer);
        self.union_changed(change)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn is_current(&self, conn: ConnectionId, phase: Phase) -> bool {
        self.current == Some(conn) && self.phase == phase
    }

    fn begin_attempt(&mut self, effects: &mut Vec<Effect>) {
        self.next_conn += 1;
        let conn = ConnectionId(self.next_conn);
        self.current = Some(conn);
        self.set_phase(Phase::Connecting, effects);
        tracing::debug!(%conn, "starting connection attempt");
        effects.push(Effect::ResolveEndpoint(conn));
    }

    fn connection_lost(
        &mut self,
        conn: ConnectionId,
        err: Option<&SyncError>,
        close_socket: bool,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        match err {
            Some(err) => tracing::warn!(
                %conn,
                code = %err.code(),
                error = %err,
                "realtime connection failed"
            ),
            None => tracing::info!(%conn, "realtime connection closed"),
        }

        if self.phase == Phase::Connected {
            effects.push(Effect::StopHeartbeat);
        }
        if close_socket {
            effects.push(Effect::Close(conn));
        }
        self.current = None;
        self.set_phase(Phase::Disconnected, &mut effects);

        if self.intent == Intent::Active && !self.reconnect_pending {
            self.reconnect_pending = true;
            effects.push(Effect::ScheduleReconnect(self.config.reconnect_delay));
        }
        effects
    }

    fn set_phase(&mut self, phase: Phase, effects: &mut Vec<Effect>) {
        if self.phase != phase {
            self.phase = phase;
            effects.push(Effect::PhaseChanged(phase));
        }
    }

    fn union_changed(&mut self, change: UnionChange) -> Vec<Effect> {
        let mut effects = Vec::new();
        if change.is_empty() {
            return effects;
        }

        if let Some(next) = reducer::with_subscribed(&self.state, self.registry.union()) {
            effects.push(self.publish(next));
        }
        if !change.added.is_empty() {
            effects.extend(self.send(ClientMessage::Subscribe {
                queues: change.added,
            }));
        }
        if !change.removed.is_empty() {
            effects.extend(self.send(ClientMessage::Unsubscribe {
                queues: change.removed,
            }));
        }
        effects
    }

    fn publish(&mut self, next: AssignmentsState) -> Effect {
        self.state = Arc::new(next);
        Effect::Publish(Arc::clone(&self.state))
    }

    fn placeholder_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.review_placeholder_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_REVIEW_PLACEHOLDER_SECS))
    }
}

/// Queue `message` unless the next open makes it redundant. Returns whether
/// it was queued.
fn enqueue(outbox: &mut Vec<ClientMessage>, message: ClientMessage) -> bool {
    let Some(target) = message.review_target() else {
        return false;
    };
    outbox.retain(|queued| queued.review_target() != Some(target));
    outbox.push(message);
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
