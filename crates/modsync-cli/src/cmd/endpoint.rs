//! `modsync endpoint`: show where the client would connect.

use crate::output::{CliError, OutputMode, pretty_kv, pretty_section, render_error, render_mode};
use clap::Args;
use modsync_client::token::provider_from_config;
use modsync_core::config::ClientConfig;
use modsync_core::endpoint::{realtime_enabled, redact, resolve_endpoint};
use serde::Serialize;
use std::io::Write;

#[derive(Args, Debug)]
pub struct EndpointArgs {
    /// Use this token instead of requesting one from the token endpoint.
    #[arg(long)]
    pub token: Option<String>,

    /// Print the token instead of masking it.
    #[arg(long)]
    pub reveal: bool,
}

#[derive(Debug, Serialize)]
struct EndpointView {
    available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
}

fn render_view(output: OutputMode, view: &EndpointView) -> anyhow::Result<()> {
    render_mode(
        output,
        view,
        |v, w| match &v.endpoint {
            Some(endpoint) => writeln!(w, "{endpoint}"),
            None => writeln!(w, "realtime unavailable"),
        },
        |v, w| {
            pretty_section(w, "Realtime endpoint")?;
            pretty_kv(w, "Available", if v.available { "yes" } else { "no" })?;
            if let Some(endpoint) = &v.endpoint {
                pretty_kv(w, "URL", endpoint)?;
            }
            Ok(())
        },
    )
}

pub fn run_endpoint(
    args: &EndpointArgs,
    output: OutputMode,
    config: &ClientConfig,
) -> anyhow::Result<()> {
    let unavailable = EndpointView {
        available: false,
        endpoint: None,
    };
    if !realtime_enabled(&config.service) {
        return render_view(output, &unavailable);
    }

    let token = match &args.token {
        Some(token) => token.clone(),
        None => {
            let provider = provider_from_config(&config.token);
            match super::runtime()?.block_on(provider.token()) {
                Ok(token) => token,
                Err(err) => {
                    render_error(output, &CliError::from(&err))?;
                    anyhow::bail!("{err}");
                }
            }
        }
    };

    match resolve_endpoint(&config.service, &token) {
        Ok(Some(url)) => {
            let endpoint = if args.reveal {
                url.to_string()
            } else {
                redact(&url)
            };
            render_view(
                output,
                &EndpointView {
                    available: true,
                    endpoint: Some(endpoint),
                },
            )
        }
        Ok(None) => render_view(output, &unavailable),
        Err(err) => {
            render_error(output, &CliError::from(&err))?;
            anyhow::bail!("{err}");
        }
    }
}
