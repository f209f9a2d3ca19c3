//! Orchestrator and RPC configuration
//!
//! Values come from (lowest to highest precedence) built-in defaults, an
//! optional TOML file, `SWARM_*` environment variables, and finally
//! whatever the caller sets on the struct (CLI flags).
//!
//! ```toml
//! name = "spiro"
//! master_addr = "127.0.0.1:5555"
//! worker_addrs = ["127.0.0.1:5560", "127.0.0.1:5561"]
//!
//! [rpc]
//! call_timeout_ms = 5000
//!
//! [voting]
//! method = "irv"
//! accepted = 2
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::voting::VotingMethod;

pub const ENV_MASTER_ADDR: &str = "SWARM_MASTER_ADDR";
pub const ENV_WORKER_ADDRS: &str = "SWARM_WORKER_ADDRS";
pub const ENV_CALL_TIMEOUT_MS: &str = "SWARM_CALL_TIMEOUT_MS";
pub const ENV_VOTING_METHOD: &str = "SWARM_VOTING_METHOD";
pub const ENV_ACCEPTED: &str = "SWARM_ACCEPTED";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Timeouts applied to every cross-process call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Upper bound on a single request/response exchange
    pub call_timeout_ms: u64,
    /// Upper bound on opening a connection
    pub connect_timeout_ms: u64,
    /// Upper bound on a worker's `report` up the host link
    pub host_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5000,
            connect_timeout_ms: 5000,
            host_timeout_ms: 5000,
        }
    }
}

impl RpcConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn host_timeout(&self) -> Duration {
        Duration::from_millis(self.host_timeout_ms)
    }
}

/// Voting defaults used by the simulation driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    pub method: VotingMethod,
    /// How many candidates are accepted per round
    pub accepted: usize,
    /// Fixed RNG seed for the random method
    pub seed: Option<u64>,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            method: VotingMethod::Mean,
            accepted: 1,
            seed: None,
        }
    }
}

/// Top-level multi-environment configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiEnvConfig {
    /// Used for log fields and the summary file name
    pub name: String,
    /// Endpoint the master manager listens on
    pub master_addr: String,
    /// One endpoint per worker environment
    pub worker_addrs: Vec<String>,
    /// Delay between readiness probes in `wait_slaves`
    pub ready_poll_interval_ms: u64,
    /// How long freshly launched workers get to become connectable
    pub startup_timeout_ms: u64,
    pub rpc: RpcConfig,
    pub voting: VotingConfig,
}

impl Default for MultiEnvConfig {
    fn default() -> Self {
        Self {
            name: "multi-env".into(),
            master_addr: "127.0.0.1:5555".into(),
            worker_addrs: Vec::new(),
            ready_poll_interval_ms: 100,
            startup_timeout_ms: 30_000,
            rpc: RpcConfig::default(),
            voting: VotingConfig::default(),
        }
    }
}

impl MultiEnvConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `SWARM_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup(ENV_MASTER_ADDR) {
            self.master_addr = addr;
        }
        if let Some(addrs) = lookup(ENV_WORKER_ADDRS) {
            self.worker_addrs = addrs
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(ms) = lookup(ENV_CALL_TIMEOUT_MS) {
            self.rpc.call_timeout_ms = ms.trim().parse().map_err(|e| ConfigError::Invalid {
                key: ENV_CALL_TIMEOUT_MS,
                reason: format!("{e}"),
            })?;
        }
        if let Some(method) = lookup(ENV_VOTING_METHOD) {
            self.voting.method = method.parse().map_err(|e| ConfigError::Invalid {
                key: ENV_VOTING_METHOD,
                reason: format!("{e}"),
            })?;
        }
        if let Some(accepted) = lookup(ENV_ACCEPTED) {
            self.voting.accepted = accepted.trim().parse().map_err(|e| ConfigError::Invalid {
                key: ENV_ACCEPTED,
                reason: format!("{e}"),
            })?;
        }
        Ok(())
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}
