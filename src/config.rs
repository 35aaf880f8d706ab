use crate::broker::lifetime::INACTIVITY_TIMEOUT;
use crate::broker::login_tokens::TOKEN_EXPIRE_TIME;
use crate::broker::stop_grace::DEFAULT_STOP_GRACE;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides `stop_timeout_secs` from the configuration file.
pub const STOP_TIMEOUT_ENV: &str = "SESSION_BROKER_STOP_TIMEOUT_SECS";

/// Which transport scope the daemon serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusScope {
    /// Per-user daemon; identities other than the owner cannot be resolved.
    #[default]
    Session,
    /// System-wide daemon; other users are resolved through the user directory.
    System,
}

impl BusScope {
    /// `--session` and `--system` are mutually exclusive; session is the default.
    pub fn from_flags(session: bool, system: bool) -> Self {
        if system && !session {
            BusScope::System
        } else {
            BusScope::Session
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    /// Grace period between the last client release and stopping the service.
    pub stop_timeout_secs: u64,
    /// Idle time after which an unheld daemon exits.
    pub inactivity_timeout_secs: u64,
    pub reconcile_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub login_token_ttl_secs: u64,
    /// Members of these groups are reported as administrators.
    pub admin_groups: Vec<String>,
    pub service: ServiceConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: DEFAULT_STOP_GRACE.as_secs(),
            inactivity_timeout_secs: INACTIVITY_TIMEOUT.as_secs(),
            reconcile_interval_secs: 5,
            poll_interval_secs: 1,
            login_token_ttl_secs: TOKEN_EXPIRE_TIME.as_secs(),
            admin_groups: vec!["sudo".to_string(), "wheel".to_string(), "admin".to_string()],
            service: ServiceConfig::default(),
        }
    }
}

/// How to launch the managed service.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Program to run. The service cannot be started without one.
    pub command: Option<String>,
    pub args: Vec<String>,
    /// URL the service answers on, published as `base_url`.
    pub base_url: String,
    /// Data directory of the service, published as `home_directory`.
    pub home_directory: Option<PathBuf>,
    /// Extra environment for the service process.
    pub env: BTreeMap<String, String>,
}

impl BrokerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file as YAML: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the explicit config file, else the default one if present, else defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/session-broker/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("session-broker").join("config.yaml"))
    }

    /// Apply environment overrides, then the command line stop timeout.
    pub fn apply_overrides(&mut self, stop_timeout: Option<u64>) -> Result<()> {
        if let Some(secs) = std::env::var(STOP_TIMEOUT_ENV)
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            self.stop_timeout_secs = secs;
        }
        if let Some(secs) = stop_timeout {
            self.stop_timeout_secs = secs;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.reconcile_interval_secs == 0 {
            anyhow::bail!("reconcile_interval_secs must be greater than zero");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }
        if self.login_token_ttl_secs == 0 {
            anyhow::bail!("login_token_ttl_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn login_token_ttl(&self) -> Duration {
        Duration::from_secs(self.login_token_ttl_secs)
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
