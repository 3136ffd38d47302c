//! Short-lived connection tokens.
//!
//! The websocket handshake cannot carry custom headers, so the realtime
//! endpoint authenticates with a token in the query string. A fresh token is
//! requested for every connection attempt.

use std::sync::Arc;

use async_trait::async_trait;
use modsync_core::config::TokenConfig;
use modsync_core::error::SyncError;
use serde::Deserialize;

/// Source of connection tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    /// Fetch a token for one connection attempt.
    async fn token(&self) -> Result<String, SyncError>;
}

/// A fixed, pre-issued token.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, SyncError> {
        Ok(self.0.clone())
    }
}

/// No token source configured; every attempt fails and is retried.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissingToken;

#[async_trait]
impl TokenProvider for MissingToken {
    async fn token(&self) -> Result<String, SyncError> {
        Err(SyncError::Token(
            "no token source configured ([token] url or MODSYNC_TOKEN)".to_string(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Fetches tokens from an HTTP endpoint: `GET {url}?aud={audience}`.
#[derive(Debug, Clone)]
pub struct HttpTokenProvider {
    url: String,
    audience: Option<String>,
    bearer: Option<String>,
}

impl HttpTokenProvider {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            audience: None,
            bearer: None,
        }
    }

    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    #[must_use]
    pub fn with_bearer(mut self, bearer: impl Into<String>) -> Self {
        self.bearer = Some(bearer.into());
        self
    }

    fn fetch_blocking(&self) -> Result<String, SyncError> {
        let mut request = ureq::get(&self.url).set("Accept", "application/json");
        if let Some(audience) = &self.audience {
            request = request.query("aud", audience);
        }
        if let Some(bearer) = &self.bearer {
            request = request.set("Authorization", &format!("Bearer {bearer}"));
        }

        let response = request
            .call()
            .map_err(|err| SyncError::Token(format!("{}: {err}", self.url)))?;
        let body: TokenResponse = response
            .into_json()
            .map_err(|err| SyncError::Token(format!("invalid token response: {err}")))?;

        if body.token.trim().is_empty() {
            return Err(SyncError::Token("token endpoint returned an empty token".to_string()));
        }
        Ok(body.token)
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn token(&self) -> Result<String, SyncError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.fetch_blocking())
            .await
            .map_err(|err| SyncError::Token(format!("token task failed: {err}")))?
    }
}

/// Pick a provider from config: a pre-issued token wins over the endpoint.
#[must_use]
pub fn provider_from_config(config: &TokenConfig) -> Arc<dyn TokenProvider> {
    if let Some(token) = config.token.as_deref().filter(|t| !t.trim().is_empty()) {
        return Arc::new(StaticToken::new(token));
    }
    let Some(url) = config.url.as_deref() else {
        return Arc::new(MissingToken);
    };

    let mut provider = HttpTokenProvider::new(url);
    if let Some(audience) = &config.audience {
        provider = provider.with_audience(audience);
    }
    if let Some(bearer) = &config.bearer {
        provider = provider.with_bearer(bearer);
    }
    Arc::new(provider)
}
