//! Realtime endpoint resolution.
//!
//! The realtime socket lives on the same host as the moderation service, on
//! the websocket scheme matching its HTTP scheme, with the short-lived token
//! in the query string.

use url::Url;

use crate::config::ServiceConfig;
use crate::error::SyncError;

/// Query parameter carrying the connection token.
pub const TOKEN_PARAM: &str = "token";

/// True when `service` declares the realtime capability and has a URL.
#[must_use]
pub fn realtime_enabled(service: &ServiceConfig) -> bool {
    service.realtime && service_url(service).is_some()
}

fn service_url(service: &ServiceConfig) -> Option<&str> {
    service.url.as_deref().map(str::trim).filter(|raw| !raw.is_empty())
}

/// Build the realtime URL for `service` authenticated with `token`.
///
/// Returns `Ok(None)` when the service has no URL configured or does not
/// declare the realtime capability; callers treat that as "feature off".
///
/// # Errors
///
/// Returns [`SyncError::Endpoint`] when the service URL does not parse or uses
/// a scheme with no websocket counterpart.
pub fn resolve_endpoint(service: &ServiceConfig, token: &str) -> Result<Option<Url>, SyncError> {
    if !service.realtime {
        return Ok(None);
    }
    let Some(raw) = service_url(service) else {
        return Ok(None);
    };

    let mut url =
        Url::parse(raw).map_err(|err| SyncError::Endpoint(format!("{raw}: {err}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SyncError::Endpoint(format!(
                "{raw}: unsupported scheme '{other}'"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| SyncError::Endpoint(format!("{raw}: cannot switch to {scheme}")))?;

    url.set_path(&service.realtime_path);
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair(TOKEN_PARAM, token);

    Ok(Some(url))
}

/// Render `url` for logs with the token value masked.
#[must_use]
pub fn redact(url: &Url) -> String {
    if url.query().is_none() {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == TOKEN_PARAM {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();

    let mut masked = url.clone();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}
