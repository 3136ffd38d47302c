//! `modsync completions`: shell completion scripts.

use anyhow::Result;
use clap::{Args, CommandFactory};
use clap_complete::{Shell, generate};
use std::io::{self, Write};

use crate::Cli;

/// Arguments for `modsync completions`.
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell for completion script generation.
    #[arg(value_enum)]
    pub shell: Shell,
}

fn write_completions(shell: Shell, out: &mut dyn Write) {
    let mut command = Cli::command();
    generate(shell, &mut command, "modsync", out);
}

/// Print the completion script for `args.shell` to stdout.
///
/// # Errors
///
/// Returns an error if flushing stdout fails.
pub fn run_completions(args: &CompletionsArgs) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_completions(args.shell, &mut out);
    out.flush()?;
    Ok(())
}
