//! Value types shared by the broker core, the transport and the service manager.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Version of the public broker interface, published as `protocol_version`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Identifies one client connection holding the session.
///
/// Every accepted transport connection gets a fresh id, so the id doubles as the
/// connection's unique sender name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":client.{}", self.0)
    }
}

/// A resolved user identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDetail {
    pub user_id: u32,
    pub user_name: String,
    pub full_name: String,
    pub is_admin: bool,
}

/// One reason the daemon process must stay alive.
///
/// Only presence in the hold set matters, so tokens compare by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HoldToken(Cow<'static, str>);

impl HoldToken {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    #[cfg(test)]
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }
}

impl fmt::Display for HoldToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Run state of the managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    /// A stop was requested while the service was still starting.
    StopPending,
    Stopping,
    /// The last start or run of the service failed.
    Error,
}

impl ServiceStatus {
    /// Whether the service process exists or is being brought up or down.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            ServiceStatus::Starting
                | ServiceStatus::Running
                | ServiceStatus::StopPending
                | ServiceStatus::Stopping
        )
    }

    /// Wire name published in the `status` property.
    pub fn name(self) -> &'static str {
        match self {
            ServiceStatus::Stopped => "STOPPED",
            ServiceStatus::Starting => "STARTING",
            ServiceStatus::Running => "RUNNING",
            ServiceStatus::StopPending => "STOP_PENDING",
            ServiceStatus::Stopping => "STOPPING",
            ServiceStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Properties reported by the service manager.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceProperties {
    pub app_key: String,
    pub base_url: String,
    pub home_directory: String,
    pub status: ServiceStatus,
}

/// Observable properties of the public broker surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerProperties {
    pub app_key: String,
    pub base_url: String,
    pub home_directory: String,
    pub status: String,
    pub protocol_version: u32,
}

impl Default for BrokerProperties {
    fn default() -> Self {
        Self::from(ServiceProperties::default())
    }
}

impl From<ServiceProperties> for BrokerProperties {
    fn from(props: ServiceProperties) -> Self {
        Self {
            app_key: props.app_key,
            base_url: props.base_url,
            home_directory: props.home_directory,
            status: props.status.name().to_string(),
            protocol_version: PROTOCOL_VERSION,
        }
    }
}
