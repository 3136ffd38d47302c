//! End-to-end lifecycle scenarios with a scripted executor standing in for
//! tokio and the socket.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use modsync_core::engine::{ConnectionId, Effect, Engine, Phase};
use modsync_core::error::SyncError;
use modsync_core::protocol::ClientMessage;
use modsync_core::registry::ConsumerId;
use url::Url;

/// Records what a real executor would have done.
#[derive(Default)]
struct Harness {
    wire: Vec<(ConnectionId, ClientMessage)>,
    reconnect_timer: Option<Duration>,
    heartbeat: Option<Duration>,
    open_requested: Option<ConnectionId>,
    resolving: Option<ConnectionId>,
    closed: Vec<ConnectionId>,
    publishes: usize,
}

impl Harness {
    fn run(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ResolveEndpoint(conn) => self.resolving = Some(conn),
                Effect::Open { conn, .. } => self.open_requested = Some(conn),
                Effect::Transmit { conn, message } => self.wire.push((conn, message)),
                Effect::Close(conn) => self.closed.push(conn),
                Effect::StartHeartbeat(every) => self.heartbeat = Some(every),
                Effect::StopHeartbeat => self.heartbeat = None,
                Effect::ScheduleReconnect(after) => {
                    assert!(self.reconnect_timer.is_none(), "reconnect timers stacked");
                    self.reconnect_timer = Some(after);
                }
                Effect::CancelReconnect => self.reconnect_timer = None,
                Effect::Publish(_) => self.publishes += 1,
                Effect::PhaseChanged(_) => {}
            }
        }
    }

    /// Fire the reconnect timer if armed.
    fn fire_reconnect(&mut self, engine: &mut Engine) -> bool {
        if self.reconnect_timer.take().is_none() {
            return false;
        }
        self.run(engine.reconnect_due());
        true
    }

    /// Complete token fetch and socket open for the pending attempt.
    fn establish(&mut self, engine: &mut Engine) -> ConnectionId {
        let conn = self.resolving.take().expect("an attempt is resolving");
        let url = Url::parse("wss://mod.example.com/ws/assignments?token=t").expect("url");
        self.run(engine.endpoint_resolved(conn, Ok(Some(url))));
        assert_eq!(self.open_requested.take(), Some(conn));
        self.run(engine.opened(conn));
        conn
    }

    fn frames_on(&self, conn: ConnectionId) -> Vec<&ClientMessage> {
        self.wire
            .iter()
            .filter(|(c, _)| *c == conn)
            .map(|(_, m)| m)
            .collect()
    }
}

#[test]
fn reconnect_cycle_is_transparent_to_consumers() {
    let mut engine = Engine::default();
    let mut io = Harness::default();

    io.run(engine.connect());
    let first = io.establish(&mut engine);
    io.run(engine.mount(ConsumerId::new(1), [1]));
    io.run(engine.mount(ConsumerId::new(2), [2, 1]));
    assert_eq!(
        io.frames_on(first),
        vec![
            &ClientMessage::Subscribe { queues: vec![1] },
            &ClientMessage::Subscribe { queues: vec![2] },
        ]
    );

    // peer drops us; a review start issued in the gap is queued
    io.run(engine.closed(first));
    assert_eq!(engine.phase(), Phase::Disconnected);
    assert_eq!(io.heartbeat, None);
    io.run(engine.start_review(42, Some(1)));
    io.run(engine.send(ClientMessage::Ping));

    assert!(io.fire_reconnect(&mut engine));
    let second = io.establish(&mut engine);
    assert_ne!(first, second);
    assert_eq!(
        io.frames_on(second),
        vec![
            &ClientMessage::Subscribe { queues: vec![1, 2] },
            &ClientMessage::ReviewStart {
                report_id: 42,
                queue_id: Some(1)
            },
        ]
    );
    assert_eq!(io.heartbeat, Some(Duration::from_secs(25)));

    // frames on the new socket land in state
    let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let before = io.publishes;
    io.run(engine.frame_at(
        second,
        r#"{"type":"queue:snapshot","events":[{"id":1,"did":"did:plc:a","queueId":1,"startAt":"2024-05-01T10:00:00Z","endAt":""}]}"#,
        now,
    ));
    assert_eq!(io.publishes, before + 1);
    assert_eq!(engine.state().moderators_for_queue(1), vec!["did:plc:a"]);
}

#[test]
fn error_then_close_arms_one_timer() {
    let mut engine = Engine::default();
    let mut io = Harness::default();

    io.run(engine.connect());
    let conn = io.establish(&mut engine);
    io.run(engine.errored(conn, &SyncError::Transport("broken pipe".into())));
    io.run(engine.closed(conn));

    assert_eq!(io.closed, vec![conn]);
    assert_eq!(io.reconnect_timer, Some(Duration::from_secs(3)));
}

#[test]
fn explicit_disconnect_produces_no_reconnect_attempt() {
    let mut engine = Engine::default();
    let mut io = Harness::default();

    io.run(engine.connect());
    let conn = io.establish(&mut engine);
    io.run(engine.disconnect());
    // the socket's own close notification arrives afterwards
    io.run(engine.closed(conn));

    assert_eq!(io.reconnect_timer, None);
    assert_eq!(io.heartbeat, None);
    assert!(!io.fire_reconnect(&mut engine));
    assert!(io.resolving.is_none());
    assert_eq!(engine.phase(), Phase::Disconnected);
}

#[test]
fn repeated_token_failures_retry_one_at_a_time() {
    let mut engine = Engine::default();
    let mut io = Harness::default();

    io.run(engine.connect());
    for _ in 0..3 {
        let conn = io.resolving.take().expect("attempt in flight");
        io.run(engine.endpoint_resolved(conn, Err(SyncError::Token("401".into()))));
        assert_eq!(engine.phase(), Phase::Disconnected);
        assert!(io.fire_reconnect(&mut engine));
    }
    let conn = io.establish(&mut engine);
    assert_eq!(engine.connection(), Some(conn));
    assert_eq!(engine.phase(), Phase::Connected);
}

#[test]
fn unavailable_realtime_leaves_state_untouched() {
    let mut engine = Engine::default();
    let mut io = Harness::default();
    let initial = engine.state();

    io.run(engine.connect());
    let conn = io.resolving.take().expect("attempt in flight");
    io.run(engine.endpoint_resolved(conn, Ok(None)));

    assert_eq!(engine.phase(), Phase::Disconnected);
    assert_eq!(io.reconnect_timer, None);
    assert_eq!(io.publishes, 0);
    assert!(engine.state().is_empty());
    assert!(std::sync::Arc::ptr_eq(&initial, &engine.state()));
}
