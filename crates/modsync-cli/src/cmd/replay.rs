//! `modsync replay`: fold a capture of server frames into state offline.
//!
//! The capture is JSONL, one server frame per line, exactly as it came off
//! the socket. Blank lines are skipped; lines that do not decode are counted
//! and skipped the same way the live client drops them.

use crate::output::{
    OutputMode, pretty_kv, pretty_section, render_mode, write_state_pretty, write_state_text,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Args;
use modsync_core::config::ClientConfig;
use modsync_core::model::{AssignmentsState, QueueId};
use modsync_core::protocol;
use modsync_core::reducer::{self, DEFAULT_REVIEW_PLACEHOLDER_SECS, ReduceContext};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSONL capture of server frames. Use `-` for stdin.
    pub file: PathBuf,

    /// Start as if these queues were subscribed. Repeat for several queues.
    #[arg(short, long = "queue", value_name = "ID")]
    pub queues: Vec<QueueId>,

    /// Clock used for delta-synthesized entries (RFC 3339). Defaults to now.
    #[arg(long, value_name = "TIMESTAMP")]
    pub now: Option<DateTime<Utc>>,
}

/// Outcome of a replay.
#[derive(Debug, Serialize)]
pub struct ReplaySummary {
    /// Non-blank lines read.
    pub frames: usize,
    /// Frames that changed the state.
    pub applied: usize,
    /// Frames that decoded but left the state unchanged.
    pub ignored: usize,
    /// Lines that did not decode.
    pub malformed: usize,
    pub state: AssignmentsState,
}

/// Fold every frame in `reader` into `initial`.
///
/// # Errors
///
/// Returns an error only when reading fails; bad frames are counted.
pub fn replay_frames(
    reader: impl BufRead,
    initial: AssignmentsState,
    ctx: &ReduceContext,
) -> anyhow::Result<ReplaySummary> {
    let mut summary = ReplaySummary {
        frames: 0,
        applied: 0,
        ignored: 0,
        malformed: 0,
        state: initial,
    };

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", index + 1))?;
        let frame = line.trim();
        if frame.is_empty() {
            continue;
        }
        summary.frames += 1;

        let message = match protocol::decode(frame) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(line = index + 1, error = %err, "skipping undecodable frame");
                summary.malformed += 1;
                continue;
            }
        };

        match reducer::reduce(&summary.state, &message, ctx) {
            Some(next) => {
                tracing::debug!(line = index + 1, kind = message.kind(), "frame applied");
                summary.state = next;
                summary.applied += 1;
            }
            None => summary.ignored += 1,
        }
    }

    Ok(summary)
}

fn open_capture(path: &Path) -> anyhow::Result<Box<dyn BufRead>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

fn write_counts(summary: &ReplaySummary, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "frames {} applied {} ignored {} malformed {}",
        summary.frames, summary.applied, summary.ignored, summary.malformed
    )
}

pub fn run_replay(
    args: &ReplayArgs,
    output: OutputMode,
    config: &ClientConfig,
) -> anyhow::Result<()> {
    let ttl_secs = i64::try_from(config.timing.review_placeholder_secs)
        .unwrap_or(DEFAULT_REVIEW_PLACEHOLDER_SECS);
    let ctx = ReduceContext::at(args.now.unwrap_or_else(Utc::now))
        .with_placeholder_ttl(chrono::Duration::seconds(ttl_secs));

    let initial = AssignmentsState::default();
    let initial = reducer::with_subscribed(&initial, args.queues.iter().copied()).unwrap_or(initial);

    let summary = replay_frames(open_capture(&args.file)?, initial, &ctx)?;
    tracing::info!(
        frames = summary.frames,
        applied = summary.applied,
        malformed = summary.malformed,
        "replay complete"
    );

    render_mode(
        output,
        &summary,
        |s, w| {
            write_counts(s, w)?;
            write_state_text(&s.state, w)
        },
        |s, w| {
            pretty_section(w, "Replay")?;
            pretty_kv(w, "Frames", s.frames.to_string())?;
            pretty_kv(w, "Applied", s.applied.to_string())?;
            pretty_kv(w, "Ignored", s.ignored.to_string())?;
            pretty_kv(w, "Malformed", s.malformed.to_string())?;
            writeln!(w)?;
            write_state_pretty(&s.state, w)
        },
    )
}
