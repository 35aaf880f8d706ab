//! Managed service capability consumed by the session controller.
//!
//! The controller only needs to request state changes and observe status. How
//! the service is supervised is up to the implementation; see
//! [`process::ProcessServiceManager`] for the one the daemon ships with.

pub mod process;

use crate::broker::types::{ServiceProperties, ServiceStatus};
use async_trait::async_trait;

pub use process::ProcessServiceManager;

#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Prepare the manager before the controller starts using it.
    fn init(&self) -> anyhow::Result<()>;

    /// Begin starting the service. Returns without waiting for it to come up.
    fn start_service(&self);

    /// Begin stopping the service. Returns without waiting for it to exit.
    fn stop_service(&self);

    fn status(&self) -> ServiceStatus;

    fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// Periodic housekeeping, run on every reconciliation pass.
    fn cleanup(&self) -> anyhow::Result<()>;

    /// Whether any property changed since the previous call.
    fn pop_has_changes(&self) -> bool;

    fn properties(&self) -> ServiceProperties;

    /// Wait until the service and all supervision tasks have finished.
    async fn join(&self);
}
