//! Actor-level tests: a real `SyncClient` against the in-memory connector,
//! with tokio's clock paused so reconnect and heartbeat timing is exact.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use modsync_client::token::{MissingToken, StaticToken, TokenProvider};
use modsync_client::transport::{MemoryConnector, MemoryPeer};
use modsync_client::{ClientOptions, Phase, SyncClient};
use modsync_core::config::{ServiceConfig, TimingConfig};
use modsync_core::error::SyncError;
use modsync_core::protocol::ClientMessage;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, timeout};

const PATIENCE: Duration = Duration::from_secs(600);

fn options() -> ClientOptions {
    ClientOptions {
        service: ServiceConfig {
            url: Some("http://memory.test".into()),
            ..ServiceConfig::default()
        },
        timing: TimingConfig::default(),
    }
}

fn start(options: ClientOptions) -> (SyncClient, MemoryConnector, UnboundedReceiver<MemoryPeer>) {
    let (connector, peers) = MemoryConnector::new();
    let client = SyncClient::spawn(
        options,
        Arc::new(StaticToken::new("t0k")),
        Arc::new(connector.clone()),
    );
    (client, connector, peers)
}

async fn accept(peers: &mut UnboundedReceiver<MemoryPeer>) -> MemoryPeer {
    timeout(PATIENCE, peers.recv())
        .await
        .expect("client should connect")
        .expect("connector alive")
}

async fn next_message(peer: &mut MemoryPeer) -> ClientMessage {
    let text = timeout(PATIENCE, peer.next())
        .await
        .expect("client should send a frame")
        .expect("connection open");
    serde_json::from_str(&text).expect("client frames decode")
}

/// Next frame that is not a heartbeat.
async fn next_non_ping(peer: &mut MemoryPeer) -> ClientMessage {
    loop {
        let message = next_message(peer).await;
        if message != ClientMessage::Ping {
            return message;
        }
    }
}

/// Counts fetches, then fails like an unconfigured source.
#[derive(Default)]
struct CountingToken(AtomicUsize);

#[async_trait]
impl TokenProvider for CountingToken {
    async fn token(&self) -> Result<String, SyncError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        MissingToken.token().await
    }
}

async fn wait_connected(client: &SyncClient) {
    let mut status = client.watch_status();
    timeout(PATIENCE, status.wait_for(|phase| *phase == Phase::Connected))
        .await
        .expect("client should reach Connected")
        .expect("actor alive");
}

#[tokio::test(start_paused = true)]
async fn queued_work_is_sent_after_union_on_open() {
    let (client, _connector, mut peers) = start(options());
    let _sub = client.subscribe([2, 1]);
    client.assign_report_moderator(5, Some(1));
    client.connect();

    let mut peer = accept(&mut peers).await;
    assert_eq!(peer.url.scheme(), "ws");
    assert_eq!(peer.url.path(), "/ws/assignments");
    assert_eq!(peer.url.query(), Some("token=t0k"));

    assert_eq!(
        next_message(&mut peer).await,
        ClientMessage::Subscribe { queues: vec![1, 2] }
    );
    assert_eq!(
        next_message(&mut peer).await,
        ClientMessage::ReviewStart {
            report_id: 5,
            queue_id: Some(1)
        }
    );
    wait_connected(&client).await;
}

#[tokio::test(start_paused = true)]
async fn snapshots_reach_state_and_listeners() {
    let (client, _connector, mut peers) = start(options());
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    client.add_listener(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let _sub = client.subscribe([1]);
    client.connect();
    let mut peer = accept(&mut peers).await;
    next_message(&mut peer).await;

    peer.push(r#"{"type":"error","message":"slow down"}"#);
    peer.push(
        r#"{"type":"queue:snapshot","events":[{"id":3,"did":"did:plc:a","queueId":1,"startAt":"2024-05-01T10:00:00Z","endAt":""}]}"#,
    );

    let mut states = client.watch_state();
    timeout(PATIENCE, states.wait_for(|s| !s.queue.items.is_empty()))
        .await
        .expect("snapshot should land")
        .expect("actor alive");

    let state = client.state();
    assert_eq!(state.moderators_for_queue(1), vec!["did:plc:a"]);
    assert_eq!(state.queue.subscribed, BTreeSet::from([1]));
    // one for the subscription change, one for the snapshot
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(client.status(), Phase::Connected);
}

#[tokio::test(start_paused = true)]
async fn reconnect_resubscribes_full_union_first() {
    let (client, connector, mut peers) = start(options());
    let _a = client.subscribe([1]);
    let _b = client.subscribe([2]);
    client.connect();

    let mut first = accept(&mut peers).await;
    assert_eq!(
        next_message(&mut first).await,
        ClientMessage::Subscribe { queues: vec![1, 2] }
    );
    wait_connected(&client).await;

    let dropped_at = Instant::now();
    drop(first);

    let mut second = accept(&mut peers).await;
    assert!(dropped_at.elapsed() >= Duration::from_secs(3));
    assert_eq!(
        next_message(&mut second).await,
        ClientMessage::Subscribe { queues: vec![1, 2] }
    );
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn transport_error_reconnects_once() {
    let (client, connector, mut peers) = start(options());
    client.connect();
    let first = accept(&mut peers).await;
    wait_connected(&client).await;

    first.fail("connection reset");
    let _second = accept(&mut peers).await;
    wait_connected(&client).await;

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn explicit_disconnect_never_reconnects() {
    let (client, connector, mut peers) = start(options());
    client.connect();
    let mut peer = accept(&mut peers).await;
    wait_connected(&client).await;

    client.disconnect();
    let closed = timeout(PATIENCE, peer.next()).await.expect("socket closes");
    assert_eq!(closed, None);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(peers.try_recv().is_err());
    assert_eq!(client.status(), Phase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn refused_opens_retry_at_fixed_delay() {
    let (client, connector, mut peers) = start(options());
    connector.refuse_next(2);
    let began = Instant::now();
    client.connect();

    let _peer = accept(&mut peers).await;
    assert_eq!(connector.attempts(), 3);
    assert!(began.elapsed() >= Duration::from_secs(6));
    assert!(began.elapsed() < Duration::from_secs(9));
}

#[tokio::test(start_paused = true)]
async fn missing_realtime_capability_is_a_silent_no_op() {
    let mut options = options();
    options.service.realtime = false;
    let (client, connector, _peers) = start(options);
    let initial = client.state();

    client.connect();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(connector.attempts(), 0);
    assert_eq!(client.status(), Phase::Disconnected);
    assert!(Arc::ptr_eq(&initial, &client.state()));
    assert!(client.state().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disabled_realtime_never_asks_for_a_token() {
    let mut options = options();
    options.service.realtime = false;
    let (connector, _peers) = MemoryConnector::new();
    let tokens = Arc::new(CountingToken::default());
    let client = SyncClient::spawn(options, tokens.clone(), Arc::new(connector.clone()));

    let mut status = client.watch_status();
    client.connect();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(tokens.0.load(Ordering::SeqCst), 0);
    assert_eq!(connector.attempts(), 0);
    assert_eq!(client.status(), Phase::Disconnected);

    // no retry wakes it again
    status.mark_unchanged();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!status.has_changed().expect("actor alive"));
}

#[tokio::test(start_paused = true)]
async fn heartbeat_pings_on_interval() {
    let (client, _connector, mut peers) = start(options());
    let opened_at = Instant::now();
    client.connect();
    let mut peer = accept(&mut peers).await;
    wait_connected(&client).await;

    assert_eq!(next_message(&mut peer).await, ClientMessage::Ping);
    assert!(opened_at.elapsed() >= Duration::from_secs(25));
    peer.push(r#"{"type":"pong"}"#);
    assert_eq!(next_message(&mut peer).await, ClientMessage::Ping);
}

#[tokio::test(start_paused = true)]
async fn review_claim_refreshes_until_dropped() {
    let mut options = options();
    options.timing.heartbeat_secs = 3600;
    let (client, _connector, mut peers) = start(options);
    client.connect();
    let mut peer = accept(&mut peers).await;
    wait_connected(&client).await;

    let claimed_at = Instant::now();
    let claim = client.claim_report(9, None);
    let start = ClientMessage::ReviewStart {
        report_id: 9,
        queue_id: None,
    };
    assert_eq!(next_message(&mut peer).await, start);

    assert_eq!(next_message(&mut peer).await, start);
    assert!(claimed_at.elapsed() >= Duration::from_secs(180));

    claim.release();
    assert_eq!(
        next_message(&mut peer).await,
        ClientMessage::ReviewEnd {
            report_id: 9,
            queue_id: None
        }
    );
}

#[tokio::test(start_paused = true)]
async fn dropping_a_subscription_releases_only_unshared_queues() {
    let (client, _connector, mut peers) = start(options());
    let a = client.subscribe([1, 2]);
    let b = client.subscribe([2]);
    client.connect();
    let mut peer = accept(&mut peers).await;
    next_message(&mut peer).await;

    client.unsubscribe(a);
    assert_eq!(
        next_message(&mut peer).await,
        ClientMessage::Unsubscribe { queues: vec![1] }
    );

    b.update([2, 7]);
    assert_eq!(
        next_message(&mut peer).await,
        ClientMessage::Subscribe { queues: vec![7] }
    );
    assert_eq!(client.state().queue.subscribed, BTreeSet::from([2, 7]));
}

#[tokio::test(start_paused = true)]
async fn zero_periods_keep_the_client_running() {
    let mut options = options();
    options.timing.heartbeat_secs = 0;
    options.timing.review_refresh_secs = 0;
    let (client, _connector, mut peers) = start(options);
    client.connect();
    let mut peer = accept(&mut peers).await;
    wait_connected(&client).await;

    assert_eq!(next_message(&mut peer).await, ClientMessage::Ping);

    let _sub = client.subscribe([4]);
    assert_eq!(
        next_non_ping(&mut peer).await,
        ClientMessage::Subscribe { queues: vec![4] }
    );

    let claim = client.claim_report(9, None);
    let start = ClientMessage::ReviewStart {
        report_id: 9,
        queue_id: None,
    };
    assert_eq!(next_non_ping(&mut peer).await, start);
    assert_eq!(next_non_ping(&mut peer).await, start);

    claim.release();
    loop {
        match next_non_ping(&mut peer).await {
            ClientMessage::ReviewEnd { report_id: 9, .. } => break,
            other => assert_eq!(other, start),
        }
    }
    assert_eq!(client.status(), Phase::Connected);
}

#[tokio::test(start_paused = true)]
async fn frames_lost_to_a_failed_write_go_out_on_reconnect() {
    let (client, connector, mut peers) = start(options());
    connector.break_writes_next(1);
    client.assign_report_moderator(5, None);
    client.assign_report_moderator(6, Some(2));
    client.connect();

    let _broken = accept(&mut peers).await;
    let mut peer = accept(&mut peers).await;
    assert_eq!(
        next_message(&mut peer).await,
        ClientMessage::ReviewStart {
            report_id: 5,
            queue_id: None
        }
    );
    assert_eq!(
        next_message(&mut peer).await,
        ClientMessage::ReviewStart {
            report_id: 6,
            queue_id: Some(2)
        }
    );
    assert_eq!(connector.attempts(), 2);
    wait_connected(&client).await;
}
