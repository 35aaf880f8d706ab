//! RPC server implementation for the broker daemon.
//!
//! Implements the tarpc services over Unix sockets. Every accepted connection
//! is a distinct client: it gets its own [`ClientId`], its caller uid is read
//! from the socket at accept time, and the controller is told when it closes.

use crate::broker::types::{BrokerProperties, ClientId, UserDetail};
use crate::broker::BrokerHandle;
use crate::build_info::BuildInfo;
use crate::daemon_log::daemon_log;
use crate::identity::IdentityResolver;
use crate::rpc::broker_service::{BrokerService, PrivateBrokerService};
use crate::rpc::BrokerResult;
use anyhow::{Context, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tarpc::serde_transport::Transport;
use tarpc::server::{self, Channel};
use tarpc::tokio_serde::formats::Bincode;
use tarpc::tokio_util::codec::LengthDelimitedCodec;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

/// Owner-only socket mode.
pub const PRIVATE_SOCKET_MODE: u32 = 0o600;
/// World-connectable socket mode for the system scope.
pub const SHARED_SOCKET_MODE: u32 = 0o666;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_client_id() -> ClientId {
    ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
}

type BincodeTransport<Item, SinkItem> =
    Transport<UnixStream, Item, SinkItem, Bincode<Item, SinkItem>>;

/// Length-delimited bincode framing over a Unix stream.
pub(crate) fn unix_transport<Item, SinkItem>(
    stream: UnixStream,
) -> BincodeTransport<Item, SinkItem>
where
    Item: for<'de> Deserialize<'de>,
    SinkItem: Serialize,
{
    let framed = LengthDelimitedCodec::builder().new_framed(stream);
    tarpc::serde_transport::new(framed, Bincode::default())
}

/// Server implementation for BrokerService, one per connection.
#[derive(Clone)]
pub struct BrokerServer {
    broker: BrokerHandle,
    client: ClientId,
    caller_uid: BrokerResult<u32>,
}

impl BrokerService for BrokerServer {
    async fn hold(self, _: tarpc::context::Context) -> BrokerResult<()> {
        self.broker.hold(self.client).await
    }

    async fn release(self, _: tarpc::context::Context) -> BrokerResult<()> {
        self.broker.release(self.client).await
    }

    async fn start(self, _: tarpc::context::Context) -> BrokerResult<()> {
        self.broker.start().await
    }

    async fn stop(self, _: tarpc::context::Context) -> BrokerResult<()> {
        self.broker.stop().await
    }

    async fn get_login_token(self, _: tarpc::context::Context) -> BrokerResult<String> {
        let result = self.broker.get_login_token(self.caller_uid.clone()).await;
        if let Err(e) = &result {
            daemon_log(
                "rpc_server",
                &format!("Login token refused for {}: {}", self.client, e),
            );
        }
        result
    }

    async fn properties(self, _: tarpc::context::Context) -> BrokerProperties {
        self.broker.properties()
    }

    async fn build_info(self, _: tarpc::context::Context) -> BuildInfo {
        BuildInfo::current()
    }
}

/// Server implementation for PrivateBrokerService.
#[derive(Clone)]
pub struct PrivateBrokerServer {
    broker: BrokerHandle,
}

impl PrivateBrokerService for PrivateBrokerServer {
    async fn check_login_token(
        self,
        _: tarpc::context::Context,
        key: String,
    ) -> BrokerResult<Option<UserDetail>> {
        self.broker.check_login_token(key).await
    }
}

/// Bind a Unix socket at `path` with the given permission bits, replacing a
/// stale socket file left behind by a previous daemon.
pub fn bind_socket(path: &Path, mode: u32) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket: {}", path.display()))?;
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind socket: {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    Ok(listener)
}

/// Serve the public broker service until shutdown.
pub async fn run_public_listener(
    listener: UnixListener,
    broker: BrokerHandle,
    identity: Arc<dyn IdentityResolver>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let client = next_client_id();
                        let server = BrokerServer {
                            broker: broker.clone(),
                            client,
                            caller_uid: identity.caller_uid(&stream),
                        };
                        let channel = server::BaseChannel::with_defaults(unix_transport(stream));
                        let broker = broker.clone();

                        tokio::spawn(async move {
                            channel.execute(server.serve()).for_each(|response| async {
                                tokio::spawn(response);
                            }).await;
                            broker.client_vanished(client);
                        });
                    }
                    Err(e) => {
                        daemon_log("rpc_server", &format!("Accept error: {}", e));
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }
}

/// Serve the private broker service until shutdown.
pub async fn run_private_listener(
    listener: UnixListener,
    broker: BrokerHandle,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let server = PrivateBrokerServer { broker: broker.clone() };
                        let channel = server::BaseChannel::with_defaults(unix_transport(stream));

                        tokio::spawn(async move {
                            channel.execute(server.serve()).for_each(|response| async {
                                tokio::spawn(response);
                            }).await;
                        });
                    }
                    Err(e) => {
                        daemon_log("rpc_server", &format!("Private accept error: {}", e));
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }
}
