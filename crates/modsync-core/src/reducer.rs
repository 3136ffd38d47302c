//! Fold server frames into [`AssignmentsState`].
//!
//! # Rules
//!
//! | Frame                   | Effect                                                         |
//! |-------------------------|----------------------------------------------------------------|
//! | `queue:snapshot`        | replace `queue.items`                                          |
//! | `snapshot`              | replace `queue.items`                                          |
//! | `report:snapshot`       | replace `reports`                                              |
//! | `report:review:started` | refresh timing of `(report_id, did)`, else append provisional  |
//! | `report:review:ended`   | drop `(report_id, did)`                                        |
//! | `report:actioned`       | drop every entry whose `report_id` is listed                   |
//! | `queue:assigned`        | append provisional `(queue_id, did)` unless already present    |
//! | anything else           | no change                                                      |
//!
//! Snapshots are the reconciliation point: they never merge with prior
//! state, so any drift left by dropped or reordered deltas is repaired by the
//! next one. Deltas are provisional patches a later snapshot may override.
//!
//! [`reduce`] is pure: the clock is an input and the prior state is borrowed.
//! It returns `None` when the frame changes nothing, so callers publish at
//! most one new state per frame and none for no-ops.

use chrono::{DateTime, Duration, Utc};

use crate::model::{
    AssignmentsState, Provenance, QueueAssignment, QueueId, ReportAssignment, ReportId,
};
use crate::protocol::ServerMessage;

/// How long a delta-synthesized review claim is assumed to last, in seconds.
pub const DEFAULT_REVIEW_PLACEHOLDER_SECS: i64 = 300;

/// Inputs the reducer needs besides state and frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReduceContext {
    pub now: DateTime<Utc>,
    pub review_placeholder_ttl: Duration,
}

impl ReduceContext {
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            review_placeholder_ttl: Duration::seconds(DEFAULT_REVIEW_PLACEHOLDER_SECS),
        }
    }

    #[must_use]
    pub const fn with_placeholder_ttl(mut self, ttl: Duration) -> Self {
        self.review_placeholder_ttl = ttl;
        self
    }
}

/// Apply one server frame. `None` means "unchanged".
#[must_use]
pub fn reduce(
    state: &AssignmentsState,
    message: &ServerMessage,
    ctx: &ReduceContext,
) -> Option<AssignmentsState> {
    match message {
        ServerMessage::QueueSnapshot { events } | ServerMessage::Snapshot { events } => {
            replace_queue_items(state, events)
        }
        ServerMessage::ReportSnapshot { events } => replace_reports(state, events),
        ServerMessage::ReviewStarted {
            report_id,
            moderator,
            queues,
        } => Some(review_started(
            state,
            *report_id,
            &moderator.did,
            queues.first().copied(),
            ctx,
        )),
        ServerMessage::ReviewEnded {
            report_id,
            moderator,
            ..
        } => review_ended(state, *report_id, &moderator.did),
        ServerMessage::ReportActioned { report_ids, .. } => report_actioned(state, report_ids),
        ServerMessage::QueueAssigned { queue_id, did } => queue_assigned(state, *queue_id, did, ctx),
        ServerMessage::ReportCreated { .. }
        | ServerMessage::Pong
        | ServerMessage::Error { .. }
        | ServerMessage::Unknown => None,
    }
}

/// Replace the subscribed-queue union. Only the subscription registry calls this.
#[must_use]
pub fn with_subscribed(
    state: &AssignmentsState,
    subscribed: impl IntoIterator<Item = QueueId>,
) -> Option<AssignmentsState> {
    let subscribed = subscribed.into_iter().collect();
    if state.queue.subscribed == subscribed {
        return None;
    }
    let mut next = state.clone();
    next.queue.subscribed = subscribed;
    Some(next)
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

fn replace_queue_items(
    state: &AssignmentsState,
    events: &[QueueAssignment],
) -> Option<AssignmentsState> {
    let incoming = confirmed(events);
    if state.queue.items == incoming {
        return None;
    }
    let mut next = state.clone();
    next.queue.items = incoming;
    Some(next)
}

fn replace_reports(state: &AssignmentsState, events: &[ReportAssignment]) -> Option<AssignmentsState> {
    let incoming: Vec<ReportAssignment> = events
        .iter()
        .cloned()
        .map(|mut review| {
            review.provenance = Provenance::Confirmed;
            review
        })
        .collect();
    if state.reports == incoming {
        return None;
    }
    let mut next = state.clone();
    next.reports = incoming;
    Some(next)
}

fn confirmed(events: &[QueueAssignment]) -> Vec<QueueAssignment> {
    events
        .iter()
        .cloned()
        .map(|mut item| {
            item.provenance = Provenance::Confirmed;
            item
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Deltas
// ---------------------------------------------------------------------------

fn review_started(
    state: &AssignmentsState,
    report_id: ReportId,
    did: &str,
    queue_id: Option<QueueId>,
    ctx: &ReduceContext,
) -> AssignmentsState {
    let end_at = ctx.now + ctx.review_placeholder_ttl;
    let mut next = state.clone();

    if let Some(existing) = next.reports.iter_mut().find(|r| r.is(report_id, did)) {
        *existing = ReportAssignment {
            start_at: ctx.now,
            end_at: Some(end_at),
            provenance: Provenance::Provisional,
            ..existing.clone()
        };
    } else {
        next.reports.push(ReportAssignment {
            id: 0,
            did: did.to_string(),
            report_id,
            queue_id,
            start_at: ctx.now,
            end_at: Some(end_at),
            provenance: Provenance::Provisional,
        });
    }
    next
}

fn review_ended(state: &AssignmentsState, report_id: ReportId, did: &str) -> Option<AssignmentsState> {
    if !state.reports.iter().any(|r| r.is(report_id, did)) {
        return None;
    }
    let mut next = state.clone();
    next.reports.retain(|r| !r.is(report_id, did));
    Some(next)
}

fn report_actioned(state: &AssignmentsState, report_ids: &[ReportId]) -> Option<AssignmentsState> {
    if !state.reports.iter().any(|r| report_ids.contains(&r.report_id)) {
        return None;
    }
    let mut next = state.clone();
    next.reports.retain(|r| !report_ids.contains(&r.report_id));
    Some(next)
}

fn queue_assigned(
    state: &AssignmentsState,
    queue_id: QueueId,
    did: &str,
    ctx: &ReduceContext,
) -> Option<AssignmentsState> {
    if state.queue.items.iter().any(|item| item.key() == (queue_id, did)) {
        return None;
    }
    let mut next = state.clone();
    next.queue
        .items
        .push(QueueAssignment::provisional(queue_id, did, ctx.now));
    Some(next)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
