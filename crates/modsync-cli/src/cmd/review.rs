//! `modsync review`: hold a review claim on one report until interrupted.

use crate::cmd::watch::realtime_unavailable;
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use anyhow::Context;
use clap::Args;
use modsync_client::{Phase, SyncClient};
use modsync_core::config::ClientConfig;
use modsync_core::endpoint::realtime_enabled;
use modsync_core::model::{QueueId, ReportId};
use serde::Serialize;
use std::io::Write;
use std::time::Duration;

/// How long to wait for the end-of-review frame to go out on exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Args, Debug)]
pub struct ReviewArgs {
    /// Report to claim.
    pub report_id: ReportId,

    /// Queue the report was opened from.
    #[arg(short, long, value_name = "ID")]
    pub queue: Option<QueueId>,
}

#[derive(Debug, Serialize)]
struct ClaimView {
    report_id: ReportId,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue_id: Option<QueueId>,
    status: &'static str,
}

fn render_claim(output: OutputMode, view: &ClaimView) -> anyhow::Result<()> {
    render_mode(
        output,
        view,
        |v, w| writeln!(w, "{} {}", v.status, v.report_id),
        |v, w| {
            pretty_section(w, "Review")?;
            pretty_kv(w, "Report", v.report_id.to_string())?;
            if let Some(queue) = v.queue_id {
                pretty_kv(w, "Queue", queue.to_string())?;
            }
            pretty_kv(w, "Status", v.status)
        },
    )
}

pub fn run_review(
    args: &ReviewArgs,
    output: OutputMode,
    config: &ClientConfig,
) -> anyhow::Result<()> {
    if !realtime_enabled(&config.service) {
        return realtime_unavailable(output);
    }
    super::runtime()?.block_on(review(args, output, config))
}

async fn review(args: &ReviewArgs, output: OutputMode, config: &ClientConfig) -> anyhow::Result<()> {
    let client = SyncClient::from_config(config);
    client.connect();
    let claim = client.claim_report(args.report_id, args.queue);
    tracing::info!(report_id = args.report_id, queue_id = ?args.queue, "review claimed");

    render_claim(
        output,
        &ClaimView {
            report_id: args.report_id,
            queue_id: args.queue,
            status: "claimed",
        },
    )?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    claim.finish().await;
    client.disconnect();

    let mut status = client.watch_status();
    let settled = tokio::time::timeout(
        SHUTDOWN_GRACE,
        status.wait_for(|phase| *phase == Phase::Disconnected),
    )
    .await
    .is_ok_and(|closed| closed.is_ok());
    if !settled {
        tracing::warn!("connection did not close cleanly before exit");
    }

    render_claim(
        output,
        &ClaimView {
            report_id: args.report_id,
            queue_id: args.queue,
            status: "released",
        },
    )
}
