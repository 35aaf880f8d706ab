//! Daemon lifecycle: single-instance lock, wiring, exit and teardown.

use crate::broker::lifetime::ProcessLifetime;
use crate::broker::login_tokens::LoginTokenStore;
use crate::broker::{BrokerHandle, BrokerTimings};
use crate::broker_paths::BrokerPaths;
use crate::config::{BrokerConfig, BusScope};
use crate::daemon::rpc_server::{
    bind_socket, run_private_listener, run_public_listener, PRIVATE_SOCKET_MODE,
    SHARED_SOCKET_MODE,
};
use crate::daemon_log::{self, daemon_log};
use crate::identity::{
    LocalAccount, PeerCredResolver, SystemDirectory, UserDirectory, UserResolver,
};
use crate::service::{ProcessServiceManager, ServiceManager};
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::File;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Why the daemon is exiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Idle,
    Interrupted,
    Terminated,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Idle => write!(f, "idle with no holds"),
            ExitReason::Interrupted => write!(f, "interrupted"),
            ExitReason::Terminated => write!(f, "terminated"),
        }
    }
}

/// Socket mode of the public socket. Other users may only connect to a
/// system-scope daemon.
pub fn public_socket_mode(scope: BusScope) -> u32 {
    match scope {
        BusScope::System => SHARED_SOCKET_MODE,
        BusScope::Session => PRIVATE_SOCKET_MODE,
    }
}

/// Take the single-instance lock. The lock is held for as long as the
/// returned file is open.
pub fn acquire_instance_lock(paths: &BrokerPaths) -> Result<File> {
    let lock_path = paths.lock();
    let lock_file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
    lock_file
        .try_lock_exclusive()
        .with_context(|| format!("Another broker daemon holds {}", lock_path.display()))?;
    Ok(lock_file)
}

/// Run the broker daemon until it goes idle or is signalled.
pub async fn run_daemon(scope: BusScope, config: BrokerConfig, paths: BrokerPaths) -> Result<()> {
    paths.ensure_home()?;
    daemon_log::init(paths.debug_log());
    let lock_file = acquire_instance_lock(&paths)?;

    let pid_path = paths.pid();
    std::fs::write(&pid_path, std::process::id().to_string())
        .context("Failed to write PID file")?;

    let public_listener = bind_socket(&paths.public_socket(), public_socket_mode(scope))?;
    let private_listener = bind_socket(&paths.private_socket(), PRIVATE_SOCKET_MODE)?;

    let service = Arc::new(ProcessServiceManager::new(config.service.clone()));
    service.init()?;

    let directory: Option<Arc<dyn UserDirectory>> = match scope {
        BusScope::System => Some(Arc::new(SystemDirectory::new(config.admin_groups.clone()))),
        BusScope::Session => None,
    };
    let users = UserResolver::new(LocalAccount::current()?, directory);
    let lifetime = Arc::new(ProcessLifetime::new(config.inactivity_timeout()));

    let (broker, actor_join) = BrokerHandle::spawn(
        service.clone(),
        lifetime.clone(),
        LoginTokenStore::new(config.login_token_ttl()),
        BrokerTimings::from(&config),
        users,
    )
    .await?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let public_task = tokio::spawn(run_public_listener(
        public_listener,
        broker.clone(),
        Arc::new(PeerCredResolver),
        shutdown_tx.clone(),
    ));
    let private_task = tokio::spawn(run_private_listener(
        private_listener,
        broker.clone(),
        shutdown_tx.clone(),
    ));

    daemon_log(
        "server",
        &format!(
            "Broker daemon {} listening on {}",
            std::process::id(),
            paths.public_socket().display()
        ),
    );

    let reason = wait_for_exit(&lifetime).await?;
    daemon_log("server", &format!("Shutting down: {}", reason));

    let _ = shutdown_tx.send(());
    let _ = public_task.await;
    let _ = private_task.await;

    broker.shutdown();
    if let Err(e) = actor_join.await {
        daemon_log("server", &format!("Broker actor ended abnormally: {}", e));
    }
    service.join().await;

    let _ = std::fs::remove_file(paths.public_socket());
    let _ = std::fs::remove_file(paths.private_socket());
    let _ = std::fs::remove_file(&pid_path);
    FileExt::unlock(&lock_file)?;

    daemon_log("server", "Broker daemon exited");
    Ok(())
}

async fn wait_for_exit(lifetime: &ProcessLifetime) -> Result<ExitReason> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    Ok(tokio::select! {
        _ = lifetime.idle_exit() => ExitReason::Idle,
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            ExitReason::Interrupted
        }
        _ = terminate.recv() => ExitReason::Terminated,
    })
}
