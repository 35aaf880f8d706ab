//! RPC clients for the broker daemon.
//!
//! [`BrokerClient::connect_or_spawn`] activates the daemon on demand: if
//! nothing answers on the public socket, one client starts the daemon while
//! concurrent callers wait for the socket to come up.

use crate::broker::types::{BrokerProperties, UserDetail};
use crate::broker_paths::{BrokerPaths, HOME_ENV};
use crate::build_info::BuildInfo;
use crate::config::BusScope;
use crate::daemon::rpc_server::unix_transport;
use crate::daemon_log::daemon_log;
use crate::rpc::broker_service::{BrokerServiceClient, PrivateBrokerServiceClient};
use anyhow::{Context, Result};
use fs2::FileExt;
use std::path::Path;
use std::time::Duration;
use tarpc::{client, context};
use tokio::net::UnixStream;

/// Maximum connection attempts with exponential backoff.
const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Base delay for exponential backoff (milliseconds).
const BASE_DELAY_MS: u64 = 100;

/// Maximum time to wait for a spawned daemon to bind its socket (milliseconds).
const DAEMON_INIT_TIMEOUT_MS: u64 = 5000;

/// Client for the public broker service.
///
/// The daemon keys holds by connection, so a hold lasts until [`release`]
/// is called or this client is dropped.
///
/// [`release`]: BrokerClient::release
pub struct BrokerClient {
    client: BrokerServiceClient,
}

impl BrokerClient {
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
        let client =
            BrokerServiceClient::new(client::Config::default(), unix_transport(stream)).spawn();
        Ok(Self { client })
    }

    /// Connect to the daemon, starting it first if it is not running.
    pub async fn connect_or_spawn(paths: &BrokerPaths, scope: BusScope) -> Result<Self> {
        let socket_path = paths.public_socket();
        if let Ok(client) = Self::connect(&socket_path).await {
            return Ok(client);
        }

        paths.ensure_home()?;
        let lock_path = paths.spawn_lock();
        let lock_file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .context("Failed to open spawn lock file")?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                let spawned = spawn_daemon_and_wait(paths, scope).await;
                FileExt::unlock(&lock_file)?;
                spawned?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // Another client is starting the daemon
                wait_for_socket(&socket_path).await?;
            }
            Err(e) => {
                return Err(e).context("Failed to acquire spawn lock");
            }
        }

        Self::connect_with_retry(&socket_path).await
    }

    async fn connect_with_retry(socket_path: &Path) -> Result<Self> {
        let mut delay_ms = BASE_DELAY_MS;

        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            if let Ok(client) = Self::connect(socket_path).await {
                return Ok(client);
            }

            if attempt < MAX_CONNECT_ATTEMPTS {
                // Add jitter (±25%)
                let jitter = (delay_ms as f64 * 0.25 * (rand::random::<f64>() * 2.0 - 1.0)) as i64;
                let actual_delay = (delay_ms as i64 + jitter).max(10) as u64;
                tokio::time::sleep(Duration::from_millis(actual_delay)).await;
                delay_ms *= 2;
            }
        }

        anyhow::bail!("Failed to connect after {} attempts", MAX_CONNECT_ATTEMPTS)
    }

    pub async fn hold(&self) -> Result<()> {
        self.client
            .hold(context::current())
            .await
            .context("hold RPC failed")??;
        Ok(())
    }

    pub async fn release(&self) -> Result<()> {
        self.client
            .release(context::current())
            .await
            .context("release RPC failed")??;
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.client
            .start(context::current())
            .await
            .context("start RPC failed")??;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.client
            .stop(context::current())
            .await
            .context("stop RPC failed")??;
        Ok(())
    }

    pub async fn get_login_token(&self) -> Result<String> {
        Ok(self
            .client
            .get_login_token(context::current())
            .await
            .context("get_login_token RPC failed")??)
    }

    pub async fn properties(&self) -> Result<BrokerProperties> {
        self.client
            .properties(context::current())
            .await
            .context("properties RPC failed")
    }

    pub async fn build_info(&self) -> Result<BuildInfo> {
        self.client
            .build_info(context::current())
            .await
            .context("build_info RPC failed")
    }
}

/// Client for the owner-only broker service.
pub struct PrivateBrokerClient {
    client: PrivateBrokerServiceClient,
}

impl PrivateBrokerClient {
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
        let client =
            PrivateBrokerServiceClient::new(client::Config::default(), unix_transport(stream))
                .spawn();
        Ok(Self { client })
    }

    pub async fn check_login_token(&self, key: &str) -> Result<Option<UserDetail>> {
        Ok(self
            .client
            .check_login_token(context::current(), key.to_string())
            .await
            .context("check_login_token RPC failed")??)
    }
}

async fn spawn_daemon_and_wait(paths: &BrokerPaths, scope: BusScope) -> Result<()> {
    daemon_log("rpc_client", "Spawning new broker daemon");

    let exe = std::env::current_exe()
        .or_else(|_| which::which("session-broker"))
        .context("Failed to find session-broker binary")?;

    let scope_flag = match scope {
        BusScope::Session => "--session",
        BusScope::System => "--system",
    };

    // Pass the runtime directory so the daemon binds where this client looks.
    std::process::Command::new(&exe)
        .arg(scope_flag)
        .arg("daemon")
        .env(HOME_ENV, paths.home())
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("Failed to spawn daemon")?;

    wait_for_socket(&paths.public_socket()).await
}

/// Wait until something accepts connections on `socket_path`.
async fn wait_for_socket(socket_path: &Path) -> Result<()> {
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(DAEMON_INIT_TIMEOUT_MS);

    while start.elapsed() < timeout {
        if UnixStream::connect(socket_path).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    anyhow::bail!("Timeout waiting for daemon socket {}", socket_path.display())
}
