//! Subcommand handlers.

use anyhow::Context;

pub mod completions;
pub mod endpoint;
pub mod replay;
pub mod review;
pub mod watch;

/// Runtime for the subcommands that talk to the service.
pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}
