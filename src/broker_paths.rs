//! Runtime file locations of the broker daemon.
//!
//! Everything the daemon and its clients share lives in one directory:
//! - `broker.sock` - public RPC socket
//! - `broker-private.sock` - owner-only RPC socket
//! - `broker.pid` - PID of the running daemon
//! - `broker.lock` - single-instance lock held by the daemon
//! - `spawn.lock` - serialises clients starting the daemon on demand
//! - `daemon-debug.log` - debug log

use crate::config::BusScope;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Overrides the runtime directory for every scope.
pub const HOME_ENV: &str = "SESSION_BROKER_HOME";

const BROKER_DIR: &str = "session-broker";
const SYSTEM_RUNTIME_DIR: &str = "/run/session-broker";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerPaths {
    home: PathBuf,
}

impl BrokerPaths {
    /// Resolve the runtime directory for `scope`.
    pub fn for_scope(scope: BusScope) -> Result<Self> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|home| !home.is_empty()) {
            return Ok(Self::at(PathBuf::from(home)));
        }
        let home = match scope {
            BusScope::System => PathBuf::from(SYSTEM_RUNTIME_DIR),
            BusScope::Session => match dirs::runtime_dir() {
                Some(runtime) => runtime.join(BROKER_DIR),
                None => dirs::home_dir()
                    .context("Could not determine home directory for broker runtime files")?
                    .join(".session-broker"),
            },
        };
        Ok(Self::at(home))
    }

    pub fn at(home: PathBuf) -> Self {
        Self { home }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Create the runtime directory if it doesn't exist.
    pub fn ensure_home(&self) -> Result<()> {
        fs::create_dir_all(&self.home).with_context(|| {
            format!(
                "Failed to create broker runtime directory: {}",
                self.home.display()
            )
        })
    }

    pub fn public_socket(&self) -> PathBuf {
        self.home.join("broker.sock")
    }

    pub fn private_socket(&self) -> PathBuf {
        self.home.join("broker-private.sock")
    }

    pub fn pid(&self) -> PathBuf {
        self.home.join("broker.pid")
    }

    pub fn lock(&self) -> PathBuf {
        self.home.join("broker.lock")
    }

    pub fn spawn_lock(&self) -> PathBuf {
        self.home.join("spawn.lock")
    }

    pub fn debug_log(&self) -> PathBuf {
        self.home.join("daemon-debug.log")
    }
}
