//! The shared-connection client.
//!
//! [`SyncClient`] is a cheap handle. All real work happens in one background
//! task (the actor) that owns the [`Engine`], the socket halves, the heartbeat
//! interval and the reconnect deadline. Handles talk to it over an unbounded
//! channel, so every facade call returns immediately and all inputs are
//! applied in the order they were made.
//!
//! Token fetch, endpoint resolution and socket open run in short-lived
//! spawned tasks that report back to the actor tagged with their
//! [`ConnectionId`]; the engine discards reports from attempts it has since
//! abandoned.

use std::collections::VecDeque;
use std::fmt;
use std::future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use modsync_core::config::{ClientConfig, ServiceConfig, TimingConfig};
use modsync_core::endpoint::{realtime_enabled, redact, resolve_endpoint};
use modsync_core::engine::{ConnectionId, Effect, Engine, EngineConfig, Phase};
use modsync_core::error::SyncError;
use modsync_core::model::{AssignmentsState, QueueId, ReportId};
use modsync_core::protocol::{self, ClientMessage};
use modsync_core::registry::ConsumerId;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use url::Url;

use crate::listeners::{ListenerId, Listeners};
use crate::token::{TokenProvider, provider_from_config};
use crate::transport::{Connector, FrameSink, FrameStream, WsConnector};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Everything the client needs besides its token source and connector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    pub service: ServiceConfig,
    pub timing: TimingConfig,
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            service: config.service.clone(),
            timing: config.timing.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Actor protocol
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Mount(ConsumerId, Vec<QueueId>),
    Update(ConsumerId, Vec<QueueId>),
    Unmount(ConsumerId),
    StartReview(ReportId, Option<QueueId>),
    EndReview(ReportId, Option<QueueId>),
}

/// Reports from spawned connection tasks.
enum Report {
    Resolved(ConnectionId, Result<Option<Url>, SyncError>),
    Opened(ConnectionId, FrameSink, FrameStream),
    OpenFailed(ConnectionId, SyncError),
}

struct Socket {
    conn: ConnectionId,
    sink: FrameSink,
    stream: FrameStream,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

struct Shared {
    commands: mpsc::UnboundedSender<Command>,
    listeners: Listeners,
    state: watch::Receiver<Arc<AssignmentsState>>,
    status: watch::Receiver<Phase>,
    next_consumer: AtomicU64,
    review_refresh: Duration,
}

/// Handle to the shared realtime connection. Clones share one connection.
#[derive(Clone)]
pub struct SyncClient {
    shared: Arc<Shared>,
}

impl fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncClient")
            .field("status", &self.status())
            .field("listeners", &self.shared.listeners.len())
            .finish_non_exhaustive()
    }
}

impl SyncClient {
    /// Client over real websockets with the token source named in `config`.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::spawn(
            ClientOptions::from(config),
            provider_from_config(&config.token),
            Arc::new(WsConnector),
        )
    }

    /// Start the actor with explicit collaborators.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(
        options: ClientOptions,
        tokens: Arc<dyn TokenProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (reports_tx, reports) = mpsc::unbounded_channel();
        let engine = Engine::new(EngineConfig::from(&options.timing));
        let (state_tx, state) = watch::channel(engine.state());
        let (status_tx, status) = watch::channel(engine.phase());
        let listeners = Listeners::new();

        let actor = Actor {
            engine,
            service: options.service,
            tokens,
            connector,
            inbox,
            reports,
            reports_tx,
            socket: None,
            pending: None,
            heartbeat: None,
            reconnect_at: None,
            listeners: listeners.clone(),
            state_tx,
            status_tx,
        };
        tokio::spawn(actor.run());

        Self {
            shared: Arc::new(Shared {
                commands,
                listeners,
                state,
                status,
                next_consumer: AtomicU64::new(1),
                review_refresh: options.timing.review_refresh_interval(),
            }),
        }
    }

    /// Bring the connection up. Idempotent; failures are retried in the background.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close the connection and suppress reconnects until [`Self::connect`].
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Declare interest in `queues` for as long as the returned guard lives.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(&self, queues: impl IntoIterator<Item = QueueId>) -> QueueSubscription {
        let id = ConsumerId::new(self.shared.next_consumer.fetch_add(1, Ordering::Relaxed));
        self.command(Command::Mount(id, queues.into_iter().collect()));
        QueueSubscription {
            id,
            commands: self.shared.commands.clone(),
        }
    }

    /// Release a subscription. Same as dropping it.
    #[allow(clippy::unused_self)]
    pub fn unsubscribe(&self, subscription: QueueSubscription) {
        drop(subscription);
    }

    /// Tell the server this moderator is reviewing `report_id`.
    pub fn assign_report_moderator(&self, report_id: ReportId, queue_id: Option<QueueId>) {
        self.command(Command::StartReview(report_id, queue_id));
    }

    /// Tell the server this moderator stopped reviewing `report_id`.
    pub fn unassign_report_moderator(&self, report_id: ReportId, queue_id: Option<QueueId>) {
        self.command(Command::EndReview(report_id, queue_id));
    }

    /// Hold a review claim on `report_id`, refreshed until the guard is dropped.
    #[must_use = "dropping the claim ends the review immediately"]
    pub fn claim_report(&self, report_id: ReportId, queue_id: Option<QueueId>) -> ReviewClaim {
        ReviewClaim::start(
            self.shared.commands.clone(),
            report_id,
            queue_id,
            self.shared.review_refresh,
        )
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> Arc<AssignmentsState> {
        Arc::clone(&self.shared.state.borrow())
    }

    /// Receiver that observes every published state.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<Arc<AssignmentsState>> {
        self.shared.state.clone()
    }

    /// Connection phase, for diagnostics.
    #[must_use]
    pub fn status(&self) -> Phase {
        *self.shared.status.borrow()
    }

    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<Phase> {
        self.shared.status.clone()
    }

    /// Call `listener` with every new state.
    pub fn add_listener(
        &self,
        listener: impl Fn(&Arc<AssignmentsState>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.listeners.add(Arc::new(listener))
    }

    /// Returns whether `id` was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    fn command(&self, command: Command) {
        send_command(&self.shared.commands, command);
    }
}

fn send_command(commands: &mpsc::UnboundedSender<Command>, command: Command) {
    if let Err(err) = commands.send(command) {
        tracing::debug!(command = ?err.0, "sync client has stopped; dropping command");
    }
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// One consumer's queue interest. Dropping it unsubscribes whatever no other
/// consumer still claims.
#[derive(Debug)]
pub struct QueueSubscription {
    id: ConsumerId,
    commands: mpsc::UnboundedSender<Command>,
}

impl QueueSubscription {
    #[must_use]
    pub const fn id(&self) -> ConsumerId {
        self.id
    }

    /// Replace the declared queues.
    pub fn update(&self, queues: impl IntoIterator<Item = QueueId>) {
        send_command(
            &self.commands,
            Command::Update(self.id, queues.into_iter().collect()),
        );
    }
}

impl Drop for QueueSubscription {
    fn drop(&mut self) {
        send_command(&self.commands, Command::Unmount(self.id));
    }
}

/// A held review claim. `report:review:start` is sent on creation and on
/// every refresh tick; `report:review:end` when the claim is dropped.
#[derive(Debug)]
pub struct ReviewClaim {
    report_id: ReportId,
    queue_id: Option<QueueId>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ReviewClaim {
    fn start(
        commands: mpsc::UnboundedSender<Command>,
        report_id: ReportId,
        queue_id: Option<QueueId>,
        refresh: Duration,
    ) -> Self {
        let (stop, mut stopped) = oneshot::channel::<()>();
        send_command(&commands, Command::StartReview(report_id, queue_id));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + refresh, refresh);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        tracing::debug!(report_id, "refreshing review claim");
                        send_command(&commands, Command::StartReview(report_id, queue_id));
                    }
                }
            }
            send_command(&commands, Command::EndReview(report_id, queue_id));
        });

        Self {
            report_id,
            queue_id,
            stop: Some(stop),
            task: Some(task),
        }
    }

    #[must_use]
    pub const fn report_id(&self) -> ReportId {
        self.report_id
    }

    #[must_use]
    pub const fn queue_id(&self) -> Option<QueueId> {
        self.queue_id
    }

    /// End the review. Same as dropping the claim.
    pub fn release(self) {
        drop(self);
    }

    /// End the review and wait until `report:review:end` is queued on the
    /// client, so a following [`SyncClient::disconnect`] is ordered after it.
    pub async fn finish(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::debug!(error = %err, "review claim task ended abnormally");
            }
        }
    }
}

impl Drop for ReviewClaim {
    fn drop(&mut self) {
        // dropping the sender wakes the refresh task, which sends the end frame
        self.stop.take();
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct Actor {
    engine: Engine,
    service: ServiceConfig,
    tokens: Arc<dyn TokenProvider>,
    connector: Arc<dyn Connector>,
    inbox: mpsc::UnboundedReceiver<Command>,
    reports: mpsc::UnboundedReceiver<Report>,
    reports_tx: mpsc::UnboundedSender<Report>,
    socket: Option<Socket>,
    pending: Option<(ConnectionId, JoinHandle<()>)>,
    heartbeat: Option<Interval>,
    reconnect_at: Option<Instant>,
    listeners: Listeners,
    state_tx: watch::Sender<Arc<AssignmentsState>>,
    status_tx: watch::Sender<Phase>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.inbox.recv() => {
                    let Some(command) = command else { break };
                    let effects = self.handle_command(command);
                    self.perform(effects).await;
                }
                Some(report) = self.reports.recv() => {
                    let effects = self.handle_report(report).await;
                    self.perform(effects).await;
                }
                (conn, frame) = next_frame(&mut self.socket) => {
                    let effects = self.handle_frame(conn, frame);
                    self.perform(effects).await;
                }
                () = tick(&mut self.heartbeat) => {
                    let effects = self.engine.heartbeat_due();
                    self.perform(effects).await;
                }
                () = deadline(self.reconnect_at) => {
                    self.reconnect_at = None;
                    let effects = self.engine.reconnect_due();
                    self.perform(effects).await;
                }
            }
        }

        tracing::debug!("all sync client handles dropped; shutting down");
        let effects = self.engine.disconnect();
        self.perform(effects).await;
    }

    fn handle_command(&mut self, command: Command) -> Vec<Effect> {
        match command {
            Command::Connect => self.engine.connect(),
            Command::Disconnect => self.engine.disconnect(),
            Command::Mount(id, queues) => self.engine.mount(id, queues),
            Command::Update(id, queues) => self.engine.update(id, queues),
            Command::Unmount(id) => self.engine.unmount(id),
            Command::StartReview(report_id, queue_id) => {
                self.engine.start_review(report_id, queue_id)
            }
            Command::EndReview(report_id, queue_id) => self.engine.end_review(report_id, queue_id),
        }
    }

    async fn handle_report(&mut self, report: Report) -> Vec<Effect> {
        match report {
            Report::Resolved(conn, endpoint) => {
                self.clear_pending(conn);
                self.engine.endpoint_resolved(conn, endpoint)
            }
            Report::OpenFailed(conn, err) => {
                self.clear_pending(conn);
                self.engine.open_failed(conn, &err)
            }
            Report::Opened(conn, mut sink, stream) => {
                self.clear_pending(conn);
                if self.engine.connection() != Some(conn) {
                    tracing::debug!(%conn, "closing socket from abandoned attempt");
                    let _ = sink.close().await;
                    return Vec::new();
                }
                self.socket = Some(Socket { conn, sink, stream });
                self.engine.opened(conn)
            }
        }
    }

    fn handle_frame(
        &mut self,
        conn: ConnectionId,
        frame: Option<Result<String, SyncError>>,
    ) -> Vec<Effect> {
        match frame {
            Some(Ok(text)) => self.engine.frame(conn, &text),
            Some(Err(err)) => self.engine.errored(conn, &err),
            None => {
                self.socket = None;
                self.engine.closed(conn)
            }
        }
    }

    async fn perform(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::ResolveEndpoint(conn) => self.spawn_resolve(conn),
                Effect::Open { conn, url } => self.spawn_open(conn, url),
                Effect::Transmit { conn, message } => {
                    if let Err(err) = self.transmit(conn, &message).await {
                        let mut unsent = vec![message];
                        unsent.extend(take_transmits(&mut queue, conn));
                        self.engine.requeue(unsent);
                        queue.extend(self.engine.errored(conn, &err));
                    }
                }
                Effect::Close(conn) => self.close(conn).await,
                Effect::StartHeartbeat(every) => {
                    let mut interval = tokio::time::interval_at(Instant::now() + every, every);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.heartbeat = Some(interval);
                }
                Effect::StopHeartbeat => self.heartbeat = None,
                Effect::ScheduleReconnect(after) => {
                    tracing::info!(delay = ?after, "reconnect scheduled");
                    self.reconnect_at = Some(Instant::now() + after);
                }
                Effect::CancelReconnect => self.reconnect_at = None,
                Effect::Publish(state) => {
                    self.state_tx.send_replace(Arc::clone(&state));
                    self.listeners.notify(&state);
                }
                Effect::PhaseChanged(phase) => {
                    tracing::debug!(%phase, "connection phase changed");
                    self.status_tx.send_replace(phase);
                }
            }
        }
    }

    async fn transmit(&mut self, conn: ConnectionId, message: &ClientMessage) -> Result<(), SyncError> {
        let Some(socket) = self.socket.as_mut().filter(|socket| socket.conn == conn) else {
            return Ok(());
        };
        let text = protocol::encode(message)
            .map_err(|err| SyncError::Transport(format!("encode {}: {err}", message.kind())))?;
        tracing::trace!(%conn, kind = message.kind(), "sending frame");
        socket.sink.send(text).await
    }

    async fn close(&mut self, conn: ConnectionId) {
        if let Some((_, handle)) = self.pending.take_if(|(pending, _)| *pending == conn) {
            handle.abort();
        }
        if let Some(mut socket) = self.socket.take_if(|socket| socket.conn == conn) {
            if let Err(err) = socket.sink.close().await {
                tracing::debug!(%conn, error = %err, "error while closing socket");
            }
        }
    }

    fn clear_pending(&mut self, conn: ConnectionId) {
        self.pending.take_if(|(pending, _)| *pending == conn);
    }

    fn spawn_resolve(&mut self, conn: ConnectionId) {
        let tokens = Arc::clone(&self.tokens);
        let service = self.service.clone();
        let reports = self.reports_tx.clone();
        let handle = tokio::spawn(async move {
            let endpoint = if realtime_enabled(&service) {
                match tokens.token().await {
                    Ok(token) => resolve_endpoint(&service, &token),
                    Err(err) => Err(err),
                }
            } else {
                Ok(None)
            };
            if let Ok(Some(url)) = &endpoint {
                tracing::debug!(%conn, endpoint = %redact(url), "resolved realtime endpoint");
            }
            let _ = reports.send(Report::Resolved(conn, endpoint));
        });
        self.pending = Some((conn, handle));
    }

    fn spawn_open(&mut self, conn: ConnectionId, url: Url) {
        let connector = Arc::clone(&self.connector);
        let reports = self.reports_tx.clone();
        let handle = tokio::spawn(async move {
            let report = match connector.open(&url).await {
                Ok((sink, stream)) => Report::Opened(conn, sink, stream),
                Err(err) => Report::OpenFailed(conn, err),
            };
            let _ = reports.send(report);
        });
        self.pending = Some((conn, handle));
    }
}

/// Pull every write still waiting for `conn` out of the worklist.
fn take_transmits(queue: &mut VecDeque<Effect>, conn: ConnectionId) -> Vec<ClientMessage> {
    let mut taken = Vec::new();
    queue.retain(|effect| match effect {
        Effect::Transmit {
            conn: target,
            message,
        } if *target == conn => {
            taken.push(message.clone());
            false
        }
        _ => true,
    });
    taken
}

async fn next_frame(socket: &mut Option<Socket>) -> (ConnectionId, Option<Result<String, SyncError>>) {
    match socket {
        Some(socket) => (socket.conn, socket.stream.next().await),
        None => future::pending().await,
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}
