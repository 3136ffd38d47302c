use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{TimeZone, Utc};
use modsync_core::engine::{Effect, Engine};
use modsync_core::model::{AssignmentsState, Provenance, QueueId};
use modsync_core::protocol::{ClientMessage, ServerMessage};
use modsync_core::reducer::{ReduceContext, reduce};
use modsync_core::registry::ConsumerId;
use url::Url;

use generators::*;

fn connected_engine() -> Engine {
    let mut engine = Engine::default();
    engine.connect();
    let conn = engine.connection().expect("attempt started");
    let url = Url::parse("ws://localhost/ws/assignments?token=t").expect("valid url");
    engine.endpoint_resolved(conn, Ok(Some(url)));
    engine.opened(conn);
    engine
}

fn sent(effects: &[Effect]) -> (BTreeSet<QueueId>, BTreeSet<QueueId>) {
    let mut subscribed = BTreeSet::new();
    let mut unsubscribed = BTreeSet::new();
    for effect in effects {
        match effect {
            Effect::Transmit {
                message: ClientMessage::Subscribe { queues },
                ..
            } => subscribed.extend(queues.iter().copied()),
            Effect::Transmit {
                message: ClientMessage::Unsubscribe { queues },
                ..
            } => unsubscribed.extend(queues.iter().copied()),
            _ => {}
        }
    }
    (subscribed, unsubscribed)
}

fn union(model: &BTreeMap<u64, BTreeSet<QueueId>>) -> BTreeSet<QueueId> {
    model.values().flatten().copied().collect()
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(2000))]

    /// Subscription traffic is exactly the set difference of the union.
    #[test]
    fn subscribe_traffic_matches_union_difference(ops in prop::collection::vec(arb_registry_op(), 0..40)) {
        let mut engine = connected_engine();
        let mut model: BTreeMap<u64, BTreeSet<QueueId>> = BTreeMap::new();

        for op in ops {
            let before = union(&model);
            let effects = match op {
                RegistryOp::Mount(raw, queues) => {
                    model.insert(raw, queues.clone());
                    engine.mount(ConsumerId::new(raw), queues)
                }
                RegistryOp::Update(raw, queues) => {
                    if let Some(slot) = model.get_mut(&raw) {
                        slot.clone_from(&queues);
                    }
                    engine.update(ConsumerId::new(raw), queues)
                }
                RegistryOp::Unmount(raw) => {
                    model.remove(&raw);
                    engine.unmount(ConsumerId::new(raw))
                }
            };
            let after = union(&model);

            let (subscribed, unsubscribed) = sent(&effects);
            prop_assert_eq!(&subscribed, &after.difference(&before).copied().collect());
            prop_assert_eq!(&unsubscribed, &before.difference(&after).copied().collect());
            prop_assert_eq!(&engine.state().queue.subscribed, &after);
            prop_assert_eq!(engine.subscribed(), after);
        }
    }

    /// Whatever deltas came before, a snapshot leaves exactly its own entries.
    #[test]
    fn snapshot_always_wins(
        deltas in prop::collection::vec(arb_delta(), 0..30),
        snapshot in prop::collection::vec(arb_report_assignment(), 0..6),
    ) {
        let ctx = ReduceContext::at(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        let mut state = AssignmentsState::default();
        for delta in &deltas {
            if let Some(next) = reduce(&state, delta, &ctx) {
                state = next;
            }
        }

        let message = ServerMessage::ReportSnapshot { events: snapshot.clone() };
        if let Some(next) = reduce(&state, &message, &ctx) {
            state = next;
        }
        prop_assert_eq!(&state.reports, &snapshot);
        prop_assert!(state.reports.iter().all(|r| r.provenance == Provenance::Confirmed));
    }

    /// Deltas alone never produce two entries with the same identity key.
    #[test]
    fn deltas_keep_keys_unique(deltas in prop::collection::vec(arb_delta(), 0..50)) {
        let ctx = ReduceContext::at(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        let mut state = AssignmentsState::default();
        for delta in &deltas {
            if let Some(next) = reduce(&state, delta, &ctx) {
                state = next;
            }
        }

        let report_keys: BTreeSet<_> = state.reports.iter().map(|r| r.key()).collect();
        prop_assert_eq!(report_keys.len(), state.reports.len());
        let queue_keys: BTreeSet<_> = state.queue.items.iter().map(|q| q.key()).collect();
        prop_assert_eq!(queue_keys.len(), state.queue.items.len());
    }
}
