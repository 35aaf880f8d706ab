//! Broker daemon process.
//!
//! ## Architecture
//!
//! - **Server (`server.rs`)**: single-instance lock, wiring of the service
//!   manager, identity resolution and the broker actor, exit on idle or signal.
//! - **RPC server (`rpc_server.rs`)**: tarpc services over the public and
//!   private Unix sockets, one client id per connection.
//! - **RPC client (`rpc_client.rs`)**: connect-or-spawn clients used by the CLI.

pub mod rpc_client;
pub mod rpc_server;
pub mod server;

#[cfg(test)]
pub(crate) mod rpc_tests;

pub use rpc_client::{BrokerClient, PrivateBrokerClient};
pub use server::run_daemon;
