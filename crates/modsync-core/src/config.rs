use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "modsync.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Where the moderation service lives and whether it speaks realtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the moderation service (`https://mod.example.com`).
    #[serde(default)]
    pub url: Option<String>,
    /// Whether the service declares the realtime capability.
    #[serde(default = "default_true")]
    pub realtime: bool,
    #[serde(default = "default_realtime_path")]
    pub realtime_path: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: None,
            realtime: default_true(),
            realtime_path: default_realtime_path(),
        }
    }
}

/// How to obtain the short-lived connection token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Token-issuing endpoint (GET, returns `{"token": "..."}`).
    #[serde(default)]
    pub url: Option<String>,
    /// Target service identity passed as `aud`.
    #[serde(default)]
    pub audience: Option<String>,
    /// Session credential sent as `Authorization: Bearer ...` to the token endpoint.
    #[serde(default)]
    pub bearer: Option<String>,
    /// Pre-issued connection token; skips the token endpoint entirely.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_review_refresh_secs")]
    pub review_refresh_secs: u64,
    #[serde(default = "default_review_placeholder_secs")]
    pub review_placeholder_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            review_refresh_secs: default_review_refresh_secs(),
            review_placeholder_secs: default_review_placeholder_secs(),
        }
    }
}

impl TimingConfig {
    /// Periodic timers never run faster than once a second; zero means one.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        at_least_one_sec(self.heartbeat_secs)
    }

    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    #[must_use]
    pub const fn review_refresh_interval(&self) -> Duration {
        at_least_one_sec(self.review_refresh_secs)
    }

    #[must_use]
    pub const fn review_placeholder_ttl(&self) -> Duration {
        Duration::from_secs(self.review_placeholder_secs)
    }
}

const fn at_least_one_sec(secs: u64) -> Duration {
    Duration::from_secs(if secs == 0 { 1 } else { secs })
}

/// Load a config file; a missing file yields defaults.
pub fn load_config(path: &Path) -> Result<ClientConfig> {
    if !path.exists() {
        return Ok(ClientConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ClientConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// User-level config location (`$XDG_CONFIG_HOME/modsync/config.toml`).
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("modsync/config.toml"))
}

/// Resolve the effective config.
///
/// Precedence (highest wins):
/// 1. `explicit` path (`--config`)
/// 2. `modsync.toml` in `cwd`
/// 3. user config dir
/// 4. defaults
///
/// Environment overrides from [`apply_env_overrides`] are applied on top.
pub fn resolve_config(explicit: Option<&Path>, cwd: &Path) -> Result<ClientConfig> {
    let config = if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("config file {} does not exist", path.display());
        }
        load_config(path)?
    } else {
        let local = cwd.join(LOCAL_CONFIG_FILE);
        if local.exists() {
            load_config(&local)?
        } else if let Some(user) = user_config_path() {
            load_config(&user)?
        } else {
            ClientConfig::default()
        }
    };

    Ok(apply_env_overrides(config, |key| std::env::var(key).ok()))
}

/// Apply `MODSYNC_SERVICE_URL`, `MODSYNC_TOKEN`, and `MODSYNC_BEARER`.
///
/// `lookup` is injected so tests never touch the process environment.
#[must_use]
pub fn apply_env_overrides(
    mut config: ClientConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> ClientConfig {
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(url) = non_empty("MODSYNC_SERVICE_URL") {
        config.service.url = Some(url);
    }
    if let Some(token) = non_empty("MODSYNC_TOKEN") {
        config.token.token = Some(token);
    }
    if let Some(bearer) = non_empty("MODSYNC_BEARER") {
        config.token.bearer = Some(bearer);
    }
    config
}

const fn default_true() -> bool {
    true
}

fn default_realtime_path() -> String {
    "/ws/assignments".to_string()
}

const fn default_heartbeat_secs() -> u64 {
    25
}

const fn default_reconnect_delay_secs() -> u64 {
    3
}

const fn default_review_refresh_secs() -> u64 {
    180
}

const fn default_review_placeholder_secs() -> u64 {
    300
}
