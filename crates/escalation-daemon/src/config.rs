//! Daemon configuration: one TOML file plus environment overrides.
//!
//! ```toml
//! [router.tiers]
//! escalation_threshold = 0.75
//!
//! [backends.tier2]
//! url = "http://localhost:8080/v1"
//! model = "small-instruct"
//!
//! [backends.tier3]
//! url = "http://localhost:8081/v1"
//! model = "large-reasoning"
//!
//! [backends.context]
//! url = "http://localhost:9000/assemble"
//! ```
//!
//! Endpoint URLs, models and API keys can be overridden with
//! `ROUTER_TIER2_URL`, `ROUTER_TIER2_MODEL`, `ROUTER_TIER2_API_KEY`, the
//! matching `ROUTER_TIER3_*` variables and `ROUTER_CONTEXT_URL`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use escalation_router::{ConfigError, RouterConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_PATH_ENV: &str = "ESCALATION_ROUTER_CONFIG";

#[derive(Debug, Error)]
pub enum DaemonConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL up to and including `/v1`
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl EndpointConfig {
    fn local(url: &str, model: &str, max_tokens: u32) -> Self {
        Self {
            url: url.to_string(),
            model: model.to_string(),
            api_key: None,
            max_tokens,
            temperature: 0.2,
        }
    }

    /// Full chat completions URL.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.url.trim_end_matches('/'))
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::local("http://localhost:8080/v1", "default", 512)
    }
}

/// Context assembly service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextServiceConfig {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub tier2: EndpointConfig,
    pub tier3: EndpointConfig,
    /// Without one, Tier 3 reasons on the caller's context alone.
    pub context: Option<ContextServiceConfig>,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            tier2: EndpointConfig::local("http://localhost:8080/v1", "tier2", 512),
            tier3: EndpointConfig::local("http://localhost:8081/v1", "tier3", 2048),
            context: None,
        }
    }
}

/// Front-end settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Seconds between metrics log lines; 0 disables the reporter.
    pub metrics_interval_secs: u64,
    /// Capacity of the invalidation feed channel.
    pub invalidation_feed_capacity: usize,
    /// Commands processed concurrently from stdin.
    pub max_in_flight: usize,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            metrics_interval_secs: 60,
            invalidation_feed_capacity: 64,
            max_in_flight: 64,
        }
    }
}

impl DaemonSettings {
    pub fn metrics_interval(&self) -> Option<Duration> {
        (self.metrics_interval_secs > 0).then(|| Duration::from_secs(self.metrics_interval_secs))
    }
}

/// Everything the daemon needs to start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub router: RouterConfig,
    pub backends: BackendsConfig,
    pub daemon: DaemonSettings,
}

impl DaemonConfig {
    /// Load from `path`, else from `$ESCALATION_ROUTER_CONFIG`, else
    /// defaults; then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, DaemonConfigError> {
        let env_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let mut config = match path.or(env_path.as_deref()) {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.router.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, DaemonConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| DaemonConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| DaemonConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Apply endpoint overrides from `lookup` (the process environment in
    /// production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (prefix, endpoint) in [
            ("ROUTER_TIER2", &mut self.backends.tier2),
            ("ROUTER_TIER3", &mut self.backends.tier3),
        ] {
            if let Some(url) = lookup(&format!("{prefix}_URL")) {
                endpoint.url = url;
            }
            if let Some(model) = lookup(&format!("{prefix}_MODEL")) {
                endpoint.model = model;
            }
            if let Some(key) = lookup(&format!("{prefix}_API_KEY")) {
                endpoint.api_key = Some(key);
            }
        }
        if let Some(url) = lookup("ROUTER_CONTEXT_URL") {
            self.backends.context = Some(ContextServiceConfig { url });
        }
    }
}
