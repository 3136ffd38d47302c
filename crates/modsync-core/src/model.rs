//! Assignment records and the shared state aggregate.
//!
//! Two kinds of claim are tracked:
//!
//! - [`QueueAssignment`]: a moderator working a queue, keyed by `(queue_id, did)`.
//! - [`ReportAssignment`]: a moderator reviewing one report, keyed by `(report_id, did)`.
//!
//! Records are never mutated in place. The reducer produces a fresh
//! [`AssignmentsState`] for every change so holders of an
//! `Arc<AssignmentsState>` can detect change with `Arc::ptr_eq`.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue identifier as issued by the moderation backend.
pub type QueueId = i64;

/// Report identifier as issued by the moderation backend.
pub type ReportId = i64;

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Where a record came from.
///
/// Not part of the wire format: everything decoded from a snapshot is
/// `Confirmed`, everything synthesized by the reducer from a delta is
/// `Provisional` until the next snapshot replaces it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    #[default]
    Confirmed,
    Provisional,
}

impl Provenance {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Provisional => "provisional",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One moderator actively claiming a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueAssignment {
    /// Server-assigned identifier; `0` for client-synthesized entries.
    #[serde(default)]
    pub id: i64,
    /// Moderator identity.
    pub did: String,
    pub queue_id: QueueId,
    pub start_at: DateTime<Utc>,
    /// `None` is open-ended or not yet known (`""` on the wire).
    #[serde(default, with = "open_ended")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub provenance: Provenance,
}

impl QueueAssignment {
    /// Placeholder for a `queue:assigned` delta, pending snapshot confirmation.
    #[must_use]
    pub fn provisional(queue_id: QueueId, did: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            did: did.into(),
            queue_id,
            start_at: now,
            end_at: None,
            provenance: Provenance::Provisional,
        }
    }

    /// Identity key used for deduplication.
    #[must_use]
    pub fn key(&self) -> (QueueId, &str) {
        (self.queue_id, self.did.as_str())
    }
}

/// One moderator actively reviewing one report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAssignment {
    /// Server-assigned identifier; `0` for client-synthesized entries.
    #[serde(default)]
    pub id: i64,
    pub did: String,
    pub report_id: ReportId,
    /// Reviews may be unscoped to any queue.
    #[serde(default)]
    pub queue_id: Option<QueueId>,
    pub start_at: DateTime<Utc>,
    #[serde(default, with = "open_ended")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub provenance: Provenance,
}

impl ReportAssignment {
    /// Identity key used for deduplication.
    #[must_use]
    pub fn key(&self) -> (ReportId, &str) {
        (self.report_id, self.did.as_str())
    }

    /// True when this record belongs to `(report_id, did)`.
    #[must_use]
    pub fn is(&self, report_id: ReportId, did: &str) -> bool {
        self.report_id == report_id && self.did == did
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// Queue slice of the shared state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSlice {
    /// Union of queue IDs wanted by every live consumer.
    pub subscribed: BTreeSet<QueueId>,
    /// Treated as a set keyed by `(queue_id, did)`.
    pub items: Vec<QueueAssignment>,
}

/// Process-wide view of who is reviewing what.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentsState {
    pub queue: QueueSlice,
    /// Treated as a set keyed by `(report_id, did)`.
    pub reports: Vec<ReportAssignment>,
}

impl AssignmentsState {
    /// True when nothing has been subscribed or received yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.subscribed.is_empty() && self.queue.items.is_empty() && self.reports.is_empty()
    }

    /// Moderators currently claiming `queue_id`, in arrival order.
    #[must_use]
    pub fn moderators_for_queue(&self, queue_id: QueueId) -> Vec<&str> {
        self.queue
            .items
            .iter()
            .filter(|item| item.queue_id == queue_id)
            .map(|item| item.did.as_str())
            .collect()
    }

    /// Review claims on `report_id`.
    #[must_use]
    pub fn reviewers_for_report(&self, report_id: ReportId) -> Vec<&ReportAssignment> {
        self.reports
            .iter()
            .filter(|review| review.report_id == report_id)
            .collect()
    }

    /// True when `did` holds a review claim on `report_id`.
    #[must_use]
    pub fn is_reviewing(&self, report_id: ReportId, did: &str) -> bool {
        self.reports.iter().any(|review| review.is(report_id, did))
    }

    /// Number of delta-synthesized records awaiting snapshot confirmation.
    #[must_use]
    pub fn provisional_count(&self) -> usize {
        let queues = self
            .queue
            .items
            .iter()
            .filter(|item| item.provenance == Provenance::Provisional)
            .count();
        let reports = self
            .reports
            .iter()
            .filter(|review| review.provenance == Provenance::Provisional)
            .count();
        queues + reports
    }
}

// ---------------------------------------------------------------------------
// Timestamp codec
// ---------------------------------------------------------------------------

/// `endAt` travels as an ISO-8601 string where `""` (or `null`) means "unknown".
mod open_ended {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)] // serde `with` dictates the signature
    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => DateTime::parse_from_rfc3339(text)
                .map(|ts| Some(ts.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
