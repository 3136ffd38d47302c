//! Output layer shared by every subcommand: pretty output for humans,
//! compact text for pipes and agents, or stable JSON.
//!
//! # Output mode resolution
//!
//! Precedence (highest wins):
//! 1. `--format` / hidden `--json` flag
//! 2. `MODSYNC_FORMAT` env var → `"pretty"` | `"text"` | `"json"`
//! 3. Default: [`OutputMode::Pretty`] if stdout is a TTY; [`OutputMode::Text`] if piped.

use clap::ValueEnum;
use modsync_core::error::SyncError;
use modsync_core::model::{AssignmentsState, Provenance};
use serde::Serialize;
use std::io::{self, IsTerminal, Write};

/// Shared width for human pretty separators.
pub const PRETTY_RULE_WIDTH: usize = 72;

/// Write a horizontal separator used by pretty human output.
pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Render a left-aligned key/value line in human output.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<12} {}", format!("{key}:"), value.as_ref())
}

/// The three output modes supported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Human-optimized output (sections, aligned fields).
    Pretty,
    /// Token-efficient plain text, one record per line.
    Text,
    /// Machine-readable JSON.
    Json,
}

impl OutputMode {
    /// Returns `true` if JSON output was requested.
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Core resolution logic, separated from I/O for testability.
fn resolve_output_mode_inner(
    format_flag: Option<OutputMode>,
    json_flag: bool,
    format_env: Option<&str>,
    is_tty: bool,
) -> OutputMode {
    if let Some(mode) = format_flag {
        return mode;
    }

    if json_flag {
        return OutputMode::Json;
    }

    if let Some(val) = format_env {
        match val.to_lowercase().as_str() {
            "json" => return OutputMode::Json,
            "text" => return OutputMode::Text,
            "pretty" => return OutputMode::Pretty,
            _ => {}
        }
    }

    if is_tty {
        OutputMode::Pretty
    } else {
        OutputMode::Text
    }
}

/// Resolve the output mode from CLI flags, environment, and TTY defaults.
pub fn resolve_output_mode(format_flag: Option<OutputMode>, json_flag: bool) -> OutputMode {
    let env_val = std::env::var("MODSYNC_FORMAT").ok();
    let is_tty = io::stdout().is_terminal();
    resolve_output_mode_inner(format_flag, json_flag, env_val.as_deref(), is_tty)
}

/// Render a serializable value with explicit pretty/text renderers.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    Ok(())
}

/// Render one record of a stream. JSON mode emits one compact object per
/// line so `watch` output can be piped through `jq -c`.
pub fn render_stream<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    out.flush()?;
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Assignment state
// ────────────────────────────────────────────────────────────────────────────

fn provenance_marker(provenance: Provenance) -> &'static str {
    match provenance {
        Provenance::Confirmed => "",
        Provenance::Provisional => " (provisional)",
    }
}

fn join_queues(state: &AssignmentsState) -> String {
    let ids: Vec<String> = state.queue.subscribed.iter().map(ToString::to_string).collect();
    if ids.is_empty() {
        "-".to_string()
    } else {
        ids.join(",")
    }
}

/// One line per record: `queue <id> <did>` and `report <id> <did> [queue]`.
pub fn write_state_text(state: &AssignmentsState, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "subscribed {}", join_queues(state))?;
    for item in &state.queue.items {
        writeln!(
            w,
            "queue {} {}{}",
            item.queue_id,
            item.did,
            provenance_marker(item.provenance)
        )?;
    }
    for review in &state.reports {
        let queue = review
            .queue_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        writeln!(
            w,
            "report {} {} {}{}",
            review.report_id,
            review.did,
            queue,
            provenance_marker(review.provenance)
        )?;
    }
    Ok(())
}

/// Sectioned human view of the state.
pub fn write_state_pretty(state: &AssignmentsState, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Queues")?;
    pretty_kv(w, "Subscribed", join_queues(state))?;
    if state.queue.items.is_empty() {
        writeln!(w, "  (no moderators on subscribed queues)")?;
    }
    for item in &state.queue.items {
        writeln!(
            w,
            "  #{:<8} {}  since {}{}",
            item.queue_id,
            item.did,
            item.start_at.format("%Y-%m-%d %H:%M:%S"),
            provenance_marker(item.provenance)
        )?;
    }

    writeln!(w)?;
    pretty_section(w, "Reviews")?;
    if state.reports.is_empty() {
        writeln!(w, "  (no active reviews)")?;
    }
    for review in &state.reports {
        let queue = review
            .queue_id
            .map_or_else(String::new, |id| format!("  queue #{id}"));
        writeln!(
            w,
            "  report {:<8} {}{}{}",
            review.report_id,
            review.did,
            queue,
            provenance_marker(review.provenance)
        )?;
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// A structured error with optional suggestion and error code.
#[derive(Debug, Serialize)]
pub struct CliError {
    /// Human-readable error message.
    pub message: String,
    /// Optional suggestion for how to fix the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Machine-readable error code (e.g. "E2001").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CliError {
    /// Create a simple error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            error_code: None,
        }
    }
}

impl From<&SyncError> for CliError {
    fn from(err: &SyncError) -> Self {
        Self {
            message: err.to_string(),
            suggestion: err.hint().map(str::to_string),
            error_code: Some(err.code().code().to_string()),
        }
    }
}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({
                "error": error,
            });
            serde_json::to_writer_pretty(&mut out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Pretty | OutputMode::Text => {
            writeln!(out, "error: {}", error.message)?;
            if let Some(ref suggestion) = error.suggestion {
                writeln!(out, "  suggestion: {suggestion}")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use modsync_core::model::{QueueAssignment, ReportAssignment};

    fn sample_state() -> AssignmentsState {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut state = AssignmentsState::default();
        state.queue.subscribed.extend([1, 2]);
        state.queue.items.push(QueueAssignment {
            id: 11,
            did: "did:plc:alice".into(),
            queue_id: 1,
            start_at: at,
            end_at: None,
            provenance: Provenance::Confirmed,
        });
        state.reports.push(ReportAssignment {
            id: 0,
            did: "did:plc:bob".into(),
            report_id: 42,
            queue_id: None,
            start_at: at,
            end_at: None,
            provenance: Provenance::Provisional,
        });
        state
    }

    // ── resolution ──────────────────────────────────────────────────────────

    #[test]
    fn format_flag_wins_over_everything() {
        let mode = resolve_output_mode_inner(Some(OutputMode::Text), true, Some("json"), true);
        assert_eq!(mode, OutputMode::Text);
    }

    #[test]
    fn json_flag_beats_env() {
        let mode = resolve_output_mode_inner(None, true, Some("pretty"), true);
        assert_eq!(mode, OutputMode::Json);
    }

    #[test]
    fn env_is_case_insensitive() {
        assert_eq!(
            resolve_output_mode_inner(None, false, Some("TEXT"), true),
            OutputMode::Text
        );
    }

    #[test]
    fn unknown_env_falls_back_to_tty_detection() {
        assert_eq!(
            resolve_output_mode_inner(None, false, Some("yaml"), true),
            OutputMode::Pretty
        );
        assert_eq!(
            resolve_output_mode_inner(None, false, None, false),
            OutputMode::Text
        );
    }

    // ── state rendering ─────────────────────────────────────────────────────

    #[test]
    fn text_state_is_one_record_per_line() {
        let mut buf = Vec::new();
        write_state_text(&sample_state(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "subscribed 1,2\nqueue 1 did:plc:alice\nreport 42 did:plc:bob - (provisional)\n"
        );
    }

    #[test]
    fn pretty_state_has_sections() {
        let mut buf = Vec::new();
        write_state_pretty(&sample_state(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("Queues\n"));
        assert!(text.contains("Reviews\n"));
        assert!(text.contains("did:plc:alice  since 2024-05-01 10:00:00"));
        assert!(text.contains("report 42"));
    }

    #[test]
    fn empty_state_renders_placeholders() {
        let mut buf = Vec::new();
        write_state_pretty(&AssignmentsState::default(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Subscribed:  -"));
        assert!(text.contains("(no active reviews)"));
    }

    // ── errors ──────────────────────────────────────────────────────────────

    #[test]
    fn sync_error_carries_code_and_hint() {
        let err = SyncError::Token("401".into());
        let cli: CliError = (&err).into();
        assert_eq!(cli.error_code.as_deref(), Some("E2001"));
        assert!(cli.suggestion.is_some());
        let json = serde_json::to_value(&cli).unwrap();
        assert_eq!(json["error_code"], "E2001");
    }

    #[test]
    fn plain_error_omits_optional_fields() {
        let json = serde_json::to_value(CliError::new("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"message": "boom"}));
    }
}
