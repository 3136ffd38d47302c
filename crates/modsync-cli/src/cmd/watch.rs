//! `modsync watch`: stream live queue and review assignments.

use crate::output::{
    CliError, OutputMode, render_error, render_stream, write_state_pretty, write_state_text,
};
use anyhow::Context;
use clap::Args;
use modsync_client::SyncClient;
use modsync_core::config::ClientConfig;
use modsync_core::endpoint::realtime_enabled;
use modsync_core::error::ErrorCode;
use modsync_core::model::QueueId;
use std::io::Write;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Queue to subscribe to. Repeat for several queues.
    #[arg(short, long = "queue", value_name = "ID", required = true)]
    pub queues: Vec<QueueId>,

    /// Exit after printing this many states.
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
}

/// Report the realtime capability as missing and fail.
pub(crate) fn realtime_unavailable(output: OutputMode) -> anyhow::Result<()> {
    let code = ErrorCode::RealtimeUnavailable;
    render_error(
        output,
        &CliError {
            message: code.message().to_string(),
            suggestion: code.hint().map(str::to_string),
            error_code: Some(code.code().to_string()),
        },
    )?;
    anyhow::bail!("realtime is not available for the configured service")
}

pub fn run_watch(args: &WatchArgs, output: OutputMode, config: &ClientConfig) -> anyhow::Result<()> {
    if !realtime_enabled(&config.service) {
        return realtime_unavailable(output);
    }
    super::runtime()?.block_on(watch(args, output, config))
}

async fn watch(args: &WatchArgs, output: OutputMode, config: &ClientConfig) -> anyhow::Result<()> {
    let client = SyncClient::from_config(config);
    let mut states = client.watch_state();
    let mut status = client.watch_status();
    let _subscription = client.subscribe(args.queues.iter().copied());
    client.connect();
    tracing::info!(queues = ?args.queues, "watching assignments");

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    let mut printed = 0usize;
    loop {
        tokio::select! {
            result = &mut interrupt => {
                result.context("Failed to listen for Ctrl-C")?;
                tracing::info!("interrupted");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let phase = *status.borrow_and_update();
                tracing::info!(%phase, "connection status");
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = Arc::clone(&states.borrow_and_update());
                render_stream(
                    output,
                    state.as_ref(),
                    |s, w| {
                        write_state_text(s, w)?;
                        writeln!(w)
                    },
                    |s, w| {
                        write_state_pretty(s, w)?;
                        writeln!(w)
                    },
                )?;
                printed += 1;
                if args.limit.is_some_and(|limit| printed >= limit) {
                    break;
                }
            }
        }
    }

    client.disconnect();
    Ok(())
}
