//! Signal federation configuration.
//!
//! Configuration is loaded from environment variables. The registry URL is
//! redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default registry key holding the JSON array of valid session ids.
pub const DEFAULT_REGISTRY_KEY: &str = "sessionid";

/// Default signaling listener address (serves `/ws` and `/pull`).
pub const DEFAULT_SIGNAL_BIND_ADDRESS: &str = "0.0.0.0:7000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default upstream node, dialed as `ws://{addr}/pull`.
pub const DEFAULT_UPSTREAM_ADDRESS: &str = "localhost:7070";

/// Default reconciliation interval in seconds (five minutes).
pub const DEFAULT_RECONCILE_INTERVAL_SECONDS: u64 = 300;

/// Default pending federation join timeout in seconds.
pub const DEFAULT_FEDERATION_JOIN_TIMEOUT_SECONDS: u64 = 30;

/// Default node ID prefix.
pub const DEFAULT_NODE_ID_PREFIX: &str = "sf";

/// Signal federation configuration.
#[derive(Clone)]
pub struct Config {
    /// Redis connection URL for the session registry.
    /// Protected by `SecretString` to prevent accidental logging.
    pub redis_url: SecretString,

    /// Registry key holding the valid session ids (default: "sessionid").
    pub registry_key: String,

    /// Signaling websocket bind address (default: "0.0.0.0:7000").
    pub signal_bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Upstream node `host:port` for the relay link.
    pub upstream_address: String,

    /// Reconciliation interval in seconds. Never zero.
    pub reconcile_interval_seconds: u64,

    /// Seconds a federation join may wait for the remote answer.
    /// Zero disables the timeout.
    pub federation_join_timeout_seconds: u64,

    /// Unique identifier for this node, used in logs.
    pub node_id: String,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &"[REDACTED]")
            .field("registry_key", &self.registry_key)
            .field("signal_bind_address", &self.signal_bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("upstream_address", &self.upstream_address)
            .field(
                "reconcile_interval_seconds",
                &self.reconcile_interval_seconds,
            )
            .field(
                "federation_join_timeout_seconds",
                &self.federation_join_timeout_seconds,
            )
            .field("node_id", &self.node_id)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = SecretString::from(
            vars.get("REDIS_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?
                .clone(),
        );

        let registry_key = vars
            .get("SF_REGISTRY_KEY")
            .cloned()
            .unwrap_or_else(|| DEFAULT_REGISTRY_KEY.to_string());

        let signal_bind_address = vars
            .get("SF_SIGNAL_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SIGNAL_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SF_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let upstream_address = vars
            .get("SF_UPSTREAM_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_UPSTREAM_ADDRESS.to_string());

        let reconcile_interval_seconds = parse_var(
            vars,
            "SF_RECONCILE_INTERVAL_SECONDS",
            DEFAULT_RECONCILE_INTERVAL_SECONDS,
        )?;
        if reconcile_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "SF_RECONCILE_INTERVAL_SECONDS must be greater than zero".to_string(),
            ));
        }

        let federation_join_timeout_seconds = parse_var(
            vars,
            "SF_FEDERATION_JOIN_TIMEOUT_SECONDS",
            DEFAULT_FEDERATION_JOIN_TIMEOUT_SECONDS,
        )?;

        let node_id = vars.get("SF_NODE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().simple().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_NODE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            redis_url,
            registry_key,
            signal_bind_address,
            health_bind_address,
            upstream_address,
            reconcile_interval_seconds,
            federation_join_timeout_seconds,
            node_id,
        })
    }

    /// URL of the upstream node's federation endpoint.
    #[must_use]
    pub fn upstream_url(&self) -> String {
        format!("ws://{}/pull", self.upstream_address)
    }

    #[must_use]
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds)
    }

    /// Pending federation join timeout, `None` when disabled.
    #[must_use]
    pub fn federation_join_timeout(&self) -> Option<Duration> {
        (self.federation_join_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.federation_join_timeout_seconds))
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{name} must be a non-negative integer, got {raw:?}"))
        }),
        None => Ok(default),
    }
}
