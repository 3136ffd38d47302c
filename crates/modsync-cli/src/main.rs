#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use modsync_core::config::{ClientConfig, resolve_config};
use output::{OutputMode, resolve_output_mode};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "modsync: live moderation assignments from the terminal",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format. Defaults to pretty on a TTY and text when piped.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Config file to use instead of ./modsync.toml or the user config.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Live",
        about = "Stream assignments for one or more queues",
        long_about = "Connect to the realtime endpoint, subscribe to the given queues, and print every new assignment state until interrupted.",
        after_help = "EXAMPLES:\n    # Watch two queues\n    modsync watch --queue 1 --queue 4\n\n    # Stop after the first snapshot arrives\n    modsync watch -q 1 --limit 2\n\n    # Stream one JSON object per state\n    modsync watch -q 1 --json | jq -c .queue"
    )]
    Watch(cmd::watch::WatchArgs),

    #[command(
        next_help_heading = "Live",
        about = "Claim a report for review until interrupted",
        long_about = "Announce that you are reviewing a report, refresh the claim periodically, and release it on Ctrl-C.",
        after_help = "EXAMPLES:\n    # Claim report 1234\n    modsync review 1234\n\n    # Claim a report opened from queue 4\n    modsync review 1234 --queue 4"
    )]
    Review(cmd::review::ReviewArgs),

    #[command(
        next_help_heading = "Diagnostics",
        about = "Show the resolved realtime endpoint",
        long_about = "Resolve the realtime endpoint from config, fetching a token unless one is given. The token is masked unless --reveal is passed.",
        after_help = "EXAMPLES:\n    # Resolve with a token from the configured token endpoint\n    modsync endpoint\n\n    # Resolve with a known token\n    modsync endpoint --token abc123\n\n    # Emit machine-readable output\n    modsync endpoint --json"
    )]
    Endpoint(cmd::endpoint::EndpointArgs),

    #[command(
        next_help_heading = "Diagnostics",
        about = "Fold a capture of server frames into state",
        long_about = "Read a JSONL capture of server frames and apply them in order, offline, with the same decoder and reducer the live client uses.",
        after_help = "EXAMPLES:\n    # Replay a capture\n    modsync replay frames.jsonl\n\n    # Replay from stdin with a fixed clock\n    cat frames.jsonl | modsync replay - --now 2024-05-01T12:00:00Z\n\n    # Emit machine-readable output\n    modsync replay frames.jsonl --json"
    )]
    Replay(cmd::replay::ReplayArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Generate shell completions",
        long_about = "Generate shell completion scripts for modsync.",
        after_help = "EXAMPLES:\n    # Generate bash completions\n    modsync completions bash > ~/.local/share/bash-completion/completions/modsync\n\n    # Generate zsh completions\n    modsync completions zsh > ~/.zfunc/_modsync"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("MODSYNC_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "modsync=debug,info"
        } else {
            "modsync=info,warn"
        })
    });

    let format = env::var("MODSYNC_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let cwd = env::current_dir()?;
    let config = resolve_config(cli.config.as_deref(), &cwd)?;
    tracing::debug!(
        service = config.service.url.as_deref().unwrap_or("-"),
        realtime = config.service.realtime,
        "config resolved"
    );
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = cli.output_mode();

    match &cli.command {
        Commands::Watch(args) => cmd::watch::run_watch(args, output, &load_config(&cli)?),
        Commands::Review(args) => cmd::review::run_review(args, output, &load_config(&cli)?),
        Commands::Endpoint(args) => {
            cmd::endpoint::run_endpoint(args, output, &load_config(&cli)?)
        }
        Commands::Replay(args) => cmd::replay::run_replay(args, output, &load_config(&cli)?),
        Commands::Completions(args) => cmd::completions::run_completions(args),
    }
}
