//! Wire codec for the assignments websocket.
//!
//! Every frame is one JSON object discriminated by its `type` field. Frame
//! names use the `<subject>:<verb>` convention of the moderation backend
//! (`queue:snapshot`, `report:review:started`, ...).
//!
//! Decoding is forgiving by contract: an unknown `type` decodes to
//! [`ServerMessage::Unknown`] so newer servers never break older clients, and
//! a malformed frame becomes a [`DecodeError`] the caller logs and drops.

use serde::{Deserialize, Serialize};

use crate::model::{QueueAssignment, QueueId, ReportAssignment, ReportId};

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// The moderator a delta is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Moderator {
    pub did: String,
}

/// Frames pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Authoritative replacement of the queue slice.
    #[serde(rename = "queue:snapshot")]
    QueueSnapshot { events: Vec<QueueAssignment> },

    /// Authoritative replacement of the report slice.
    #[serde(rename = "report:snapshot")]
    ReportSnapshot { events: Vec<ReportAssignment> },

    /// Older deployments send one `snapshot` frame for the queue slice.
    #[serde(rename = "snapshot")]
    Snapshot { events: Vec<QueueAssignment> },

    #[serde(rename = "report:review:started", rename_all = "camelCase")]
    ReviewStarted {
        report_id: ReportId,
        moderator: Moderator,
        #[serde(default)]
        queues: Vec<QueueId>,
    },

    #[serde(rename = "report:review:ended", rename_all = "camelCase")]
    ReviewEnded {
        report_id: ReportId,
        moderator: Moderator,
        #[serde(default)]
        queues: Vec<QueueId>,
    },

    #[serde(rename = "report:actioned", rename_all = "camelCase")]
    ReportActioned {
        report_ids: Vec<ReportId>,
        #[serde(default)]
        action_event_id: Option<i64>,
        moderator: Moderator,
        #[serde(default)]
        queues: Vec<QueueId>,
    },

    #[serde(rename = "report:created", rename_all = "camelCase")]
    ReportCreated {
        report_id: ReportId,
        #[serde(default)]
        queues: Vec<QueueId>,
    },

    #[serde(rename = "queue:assigned", rename_all = "camelCase")]
    QueueAssigned { queue_id: QueueId, did: String },

    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: String,
    },

    /// Any `type` this client does not know yet.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Wire name of this frame, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::QueueSnapshot { .. } => "queue:snapshot",
            Self::ReportSnapshot { .. } => "report:snapshot",
            Self::Snapshot { .. } => "snapshot",
            Self::ReviewStarted { .. } => "report:review:started",
            Self::ReviewEnded { .. } => "report:review:ended",
            Self::ReportActioned { .. } => "report:actioned",
            Self::ReportCreated { .. } => "report:created",
            Self::QueueAssigned { .. } => "queue:assigned",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }

    /// True for frames that replace a whole state slice.
    #[must_use]
    pub const fn is_snapshot(&self) -> bool {
        matches!(
            self,
            Self::QueueSnapshot { .. } | Self::ReportSnapshot { .. } | Self::Snapshot { .. }
        )
    }
}

/// Why a frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Syntax(serde_json::Error),

    #[error("frame has an unexpected shape: {0}")]
    Shape(serde_json::Error),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        match err.classify() {
            serde_json::error::Category::Data => Self::Shape(err),
            serde_json::error::Category::Io
            | serde_json::error::Category::Syntax
            | serde_json::error::Category::Eof => Self::Syntax(err),
        }
    }
}

/// Decode one server frame.
///
/// # Errors
///
/// Returns [`DecodeError`] when the frame is not JSON or a known `type`
/// carries the wrong fields. Unknown types are not errors.
pub fn decode(frame: &str) -> Result<ServerMessage, DecodeError> {
    Ok(serde_json::from_str(frame)?)
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { queues: Vec<QueueId> },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { queues: Vec<QueueId> },

    #[serde(rename = "report:review:start", rename_all = "camelCase")]
    ReviewStart {
        report_id: ReportId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue_id: Option<QueueId>,
    },

    #[serde(rename = "report:review:end", rename_all = "camelCase")]
    ReviewEnd {
        report_id: ReportId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        queue_id: Option<QueueId>,
    },

    #[serde(rename = "ping")]
    Ping,
}

impl ClientMessage {
    /// Wire name of this frame, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::ReviewStart { .. } => "report:review:start",
            Self::ReviewEnd { .. } => "report:review:end",
            Self::Ping => "ping",
        }
    }

    /// The report and queue a review frame is about. Start and end for the
    /// same pair share a target; the later one is the current intent.
    #[must_use]
    pub const fn review_target(&self) -> Option<(ReportId, Option<QueueId>)> {
        match self {
            Self::ReviewStart {
                report_id,
                queue_id,
            }
            | Self::ReviewEnd {
                report_id,
                queue_id,
            } => Some((*report_id, *queue_id)),
            _ => None,
        }
    }
}

/// Encode one client frame.
///
/// # Errors
///
/// Only fails if serialization itself fails, which these plain types never
/// trigger in practice.
pub fn encode(message: &ClientMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
