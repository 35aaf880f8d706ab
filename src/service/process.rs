//! Supervises the managed service as a child process.

use crate::broker::types::{ServiceProperties, ServiceStatus};
use crate::config::ServiceConfig;
use crate::daemon_log::daemon_log;
use crate::service::ServiceManager;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::FutureExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Passed to the service so it can authenticate requests from the broker's clients.
pub const APP_KEY_ENV: &str = "SESSION_BROKER_APP_KEY";
pub const HOME_DIRECTORY_ENV: &str = "SESSION_BROKER_HOME_DIRECTORY";

/// How long a service gets to exit after SIGTERM before it is killed.
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct ProcessState {
    status: ServiceStatus,
    changed: bool,
    app_key: String,
    stop_tx: Option<oneshot::Sender<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl ProcessState {
    fn set_status(&mut self, status: ServiceStatus) {
        if self.status != status {
            tracing::info!(from = %self.status, to = %status, "service status changed");
            self.status = status;
            self.changed = true;
        }
    }
}

type SharedState = Arc<Mutex<ProcessState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, ProcessState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn generate_app_key() -> String {
    rand::Rng::sample_iter(rand::thread_rng(), &rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

pub struct ProcessServiceManager {
    config: ServiceConfig,
    program: Mutex<Option<PathBuf>>,
    state: SharedState,
}

impl ProcessServiceManager {
    pub fn new(config: ServiceConfig) -> Self {
        let state = ProcessState {
            app_key: generate_app_key(),
            ..ProcessState::default()
        };
        Self {
            config,
            program: Mutex::new(None),
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn program(&self) -> Option<PathBuf> {
        self.program
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn home_directory(&self) -> String {
        self.config
            .home_directory
            .as_ref()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default()
    }

    fn build_command(&self, program: PathBuf, app_key: &str) -> Command {
        let mut command = Command::new(program);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .env(APP_KEY_ENV, app_key)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(home) = &self.config.home_directory {
            command.env(HOME_DIRECTORY_ENV, home);
        }
        command
    }
}

#[async_trait]
impl ServiceManager for ProcessServiceManager {
    fn init(&self) -> Result<()> {
        if let Some(home) = &self.config.home_directory {
            std::fs::create_dir_all(home).with_context(|| {
                format!("Failed to create service home directory: {}", home.display())
            })?;
        }
        let Some(command) = &self.config.command else {
            tracing::warn!("no service command configured; start requests will fail");
            return Ok(());
        };
        let program = which::which(command)
            .with_context(|| format!("Service command not found: {}", command))?;
        daemon_log("service", &format!("Resolved service command to {}", program.display()));
        *self
            .program
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(program);
        Ok(())
    }

    fn start_service(&self) {
        let mut state = lock(&self.state);
        if !matches!(state.status, ServiceStatus::Stopped | ServiceStatus::Error) {
            return;
        }
        let Some(program) = self.program() else {
            daemon_log("service", "Cannot start service: no command configured");
            state.set_status(ServiceStatus::Error);
            return;
        };

        state.app_key = generate_app_key();
        state.changed = true;
        state.set_status(ServiceStatus::Starting);

        let command = self.build_command(program, &state.app_key);
        let (stop_tx, stop_rx) = oneshot::channel();
        state.stop_tx = Some(stop_tx);
        state.monitor = Some(tokio::spawn(supervise(
            self.state.clone(),
            command,
            stop_rx,
        )));
    }

    fn stop_service(&self) {
        let mut state = lock(&self.state);
        match state.status {
            ServiceStatus::Starting => state.set_status(ServiceStatus::StopPending),
            ServiceStatus::Running => state.set_status(ServiceStatus::Stopping),
            _ => return,
        }
        if let Some(stop_tx) = state.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    fn status(&self) -> ServiceStatus {
        lock(&self.state).status
    }

    fn cleanup(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if !state
            .monitor
            .as_ref()
            .is_some_and(|monitor| monitor.is_finished())
        {
            return Ok(());
        }
        let Some(monitor) = state.monitor.take() else {
            return Ok(());
        };
        match monitor.now_or_never() {
            Some(Err(err)) if err.is_panic() => {
                state.set_status(ServiceStatus::Error);
                anyhow::bail!("service monitor panicked")
            }
            _ => Ok(()),
        }
    }

    fn pop_has_changes(&self) -> bool {
        std::mem::take(&mut lock(&self.state).changed)
    }

    fn properties(&self) -> ServiceProperties {
        let state = lock(&self.state);
        ServiceProperties {
            app_key: state.app_key.clone(),
            base_url: self.config.base_url.clone(),
            home_directory: self.home_directory(),
            status: state.status,
        }
    }

    async fn join(&self) {
        let monitor = lock(&self.state).monitor.take();
        if let Some(monitor) = monitor {
            if let Err(err) = monitor.await {
                daemon_log("service", &format!("Service monitor ended abnormally: {}", err));
            }
        }
    }
}

async fn supervise(state: SharedState, mut command: Command, mut stop_rx: oneshot::Receiver<()>) {
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            daemon_log("service", &format!("Failed to spawn service: {}", err));
            let mut state = lock(&state);
            let status = if state.status == ServiceStatus::StopPending {
                ServiceStatus::Stopped
            } else {
                ServiceStatus::Error
            };
            state.set_status(status);
            return;
        }
    };

    {
        let mut state = lock(&state);
        if state.status == ServiceStatus::Starting {
            state.set_status(ServiceStatus::Running);
        }
    }

    tokio::select! {
        exit = child.wait() => {
            let mut state = lock(&state);
            let stop_requested = matches!(
                state.status,
                ServiceStatus::Stopping | ServiceStatus::StopPending
            );
            let status = match exit {
                Ok(exit) if exit.success() || stop_requested => ServiceStatus::Stopped,
                Ok(exit) => {
                    daemon_log("service", &format!("Service exited unexpectedly: {}", exit));
                    ServiceStatus::Error
                }
                Err(err) => {
                    daemon_log("service", &format!("Failed to wait for service: {}", err));
                    ServiceStatus::Error
                }
            };
            state.stop_tx = None;
            state.set_status(status);
        }
        _ = &mut stop_rx => {
            lock(&state).set_status(ServiceStatus::Stopping);
            terminate(&mut child).await;
            lock(&state).set_status(ServiceStatus::Stopped);
        }
    }
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
            && tokio::time::timeout(TERMINATE_TIMEOUT, child.wait())
                .await
                .is_ok()
        {
            return;
        }
    }
    if let Err(err) = child.kill().await {
        daemon_log("service", &format!("Failed to kill service: {}", err));
    }
}
