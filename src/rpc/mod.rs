//! RPC service definitions for clients talking to the broker daemon.
//!
//! Two tarpc services are served on separate Unix sockets:
//! - `BrokerService`: session holds, service control and login tokens
//! - `PrivateBrokerService`: login token redemption, owner-only

pub mod broker_service;

use serde::{Deserialize, Serialize};

/// Errors returned by broker RPC methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerError {
    /// The caller's identity could not be mapped to a user
    IdentityResolution { message: String },
    /// The controller is gone, the daemon is shutting down
    Unavailable,
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::IdentityResolution { message } => {
                write!(f, "Cannot resolve caller identity: {}", message)
            }
            BrokerError::Unavailable => write!(f, "Broker is shutting down"),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
#[path = "tests/rpc_tests.rs"]
mod tests;
