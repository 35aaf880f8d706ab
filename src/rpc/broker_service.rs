//! Broker service definitions for client ↔ daemon RPC.

use crate::broker::types::{BrokerProperties, UserDetail};
use crate::build_info::BuildInfo;
use crate::rpc::BrokerResult;

/// Public service. Holds are keyed by the caller's connection, so dropping the
/// connection releases its hold.
#[tarpc::service]
pub trait BrokerService {
    /// Keep the session (and the managed service) alive.
    async fn hold() -> BrokerResult<()>;

    /// Drop this connection's hold.
    async fn release() -> BrokerResult<()>;

    /// Start the managed service if it is not running.
    async fn start() -> BrokerResult<()>;

    /// Stop the managed service if it is running.
    async fn stop() -> BrokerResult<()>;

    /// Issue a single-use login token for the calling user.
    /// Any previous token of that user is invalidated.
    async fn get_login_token() -> BrokerResult<String>;

    /// Current published properties.
    async fn properties() -> BrokerProperties;

    /// Build identity of the daemon.
    async fn build_info() -> BuildInfo;
}

/// Owner-only service used by the managed service itself.
#[tarpc::service]
pub trait PrivateBrokerService {
    /// Redeem a login token. `None` when the key is unknown, expired or
    /// already redeemed.
    async fn check_login_token(key: String) -> BrokerResult<Option<UserDetail>>;
}
