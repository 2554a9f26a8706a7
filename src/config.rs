//! Global configuration parsing and validation.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::AgentId;
use crate::{AppError, Result};

/// Optional child-process runtime for agent execution contexts.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentCommandConfig {
    /// Agent CLI binary launched once per pool slot.
    pub command: String,
    /// Arguments passed to the agent CLI.
    #[serde(default)]
    pub args: Vec<String>,
}

/// One entry of the validation suite.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CheckConfig {
    /// Stable check identifier reported on failure.
    pub id: String,
    /// Executable to run inside the disposable working copy.
    pub command: String,
    /// Arguments for the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Per-check timeout in seconds.
    #[serde(default = "default_check_timeout")]
    pub timeout_s: u64,
}

fn default_check_timeout() -> u64 {
    600
}

fn default_pool_size() -> usize {
    8
}

fn default_max_payload_bytes() -> usize {
    256 * 1024
}

fn default_soft_timeout() -> u64 {
    60
}

fn default_hard_timeout() -> u64 {
    120
}

fn default_restart_grace() -> u64 {
    60
}

fn default_validation_lease() -> u64 {
    600
}

fn default_poll_interval() -> u64 {
    30
}

fn default_max_transient_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_retention_days() -> u32 {
    30
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_bus_log_capacity() -> usize {
    10_000
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Repository the agents edit.
    pub workspace_root: PathBuf,
    /// Number of agents in the fixed pool.
    #[serde(default = "default_pool_size")]
    pub agent_pool_size: usize,
    /// Maximum payload size accepted by the message bus.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Silence before a resume directive is issued.
    #[serde(default = "default_soft_timeout")]
    pub soft_timeout_s: u64,
    /// Silence before a restart directive is issued.
    #[serde(default = "default_hard_timeout")]
    pub hard_timeout_s: u64,
    /// Time a restarted agent has to produce output before quarantine.
    #[serde(default = "default_restart_grace")]
    pub restart_grace_s: u64,
    /// Maximum lease hold time over a target file set during validation.
    #[serde(default = "default_validation_lease")]
    pub validation_lease_s: u64,
    /// Watchdog polling period.
    #[serde(default = "default_poll_interval")]
    pub watchdog_poll_interval_s: u64,
    /// Retries for transient pipeline failures before rejecting.
    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,
    /// Delay before the first transient retry, doubled per retry.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Days acknowledged messages and outcomes are kept.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Buffer size of the notification channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    /// Messages retained in memory for subscriber replay.
    #[serde(default = "default_bus_log_capacity")]
    pub bus_log_capacity: usize,
    /// Child-process runtime; when absent agents are driven externally.
    #[serde(default)]
    pub agent: Option<AgentCommandConfig>,
    /// Validation suite, run in order.
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// The fixed agent pool.
    #[must_use]
    pub fn agent_ids(&self) -> Vec<AgentId> {
        AgentId::pool(self.agent_pool_size)
    }

    /// Soft timeout as a [`Duration`].
    #[must_use]
    pub fn soft_timeout(&self) -> Duration {
        Duration::from_secs(self.soft_timeout_s)
    }

    /// Hard timeout as a [`Duration`].
    #[must_use]
    pub fn hard_timeout(&self) -> Duration {
        Duration::from_secs(self.hard_timeout_s)
    }

    /// Restart grace window as a [`Duration`].
    #[must_use]
    pub fn restart_grace(&self) -> Duration {
        Duration::from_secs(self.restart_grace_s)
    }

    /// Validation lease as a [`Duration`].
    #[must_use]
    pub fn validation_lease(&self) -> Duration {
        Duration::from_secs(self.validation_lease_s)
    }

    /// Watchdog poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_poll_interval_s)
    }

    /// First transient retry delay as a [`Duration`].
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Directory holding the database and audit logs.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.workspace_root.join(".steward")
    }

    /// Path of the `SQLite` database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.state_dir().join("steward.db")
    }

    /// Directory for JSONL audit logs.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }

    fn validate(&mut self) -> Result<()> {
        if self.agent_pool_size == 0 {
            return Err(AppError::Config(
                "agent_pool_size must be greater than zero".into(),
            ));
        }

        if self.max_payload_bytes == 0 {
            return Err(AppError::Config(
                "max_payload_bytes must be greater than zero".into(),
            ));
        }

        if self.soft_timeout_s == 0 || self.soft_timeout_s >= self.hard_timeout_s {
            return Err(AppError::Config(
                "soft_timeout_s must be positive and below hard_timeout_s".into(),
            ));
        }

        for (name, value) in [
            ("restart_grace_s", self.restart_grace_s),
            ("validation_lease_s", self.validation_lease_s),
            ("watchdog_poll_interval_s", self.watchdog_poll_interval_s),
        ] {
            if value == 0 {
                return Err(AppError::Config(format!("{name} must be greater than zero")));
            }
        }

        if self.event_channel_capacity == 0 || self.bus_log_capacity == 0 {
            return Err(AppError::Config(
                "event_channel_capacity and bus_log_capacity must be greater than zero".into(),
            ));
        }

        let mut seen = HashSet::new();
        for check in &self.checks {
            if check.id.trim().is_empty() {
                return Err(AppError::Config("check id must not be empty".into()));
            }
            if !seen.insert(check.id.as_str()) {
                return Err(AppError::Config(format!("duplicate check id: {}", check.id)));
            }
        }

        let canonical_root = self
            .workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
        self.workspace_root = canonical_root;

        Ok(())
    }
}
