//! Integration tests for the tarpc broker services.
//!
//! These tests spin up the real listeners on temporary Unix sockets and talk
//! to them through the real clients. Only the managed service is faked.

mod hold_tests;
mod login_token_tests;

use crate::broker::lifetime::{ProcessLifetime, INACTIVITY_TIMEOUT};
use crate::broker::login_tokens::TOKEN_EXPIRE_TIME;
use crate::broker::{BrokerHandle, BrokerTimings};
use crate::broker_paths::BrokerPaths;
use crate::daemon::rpc_client::{BrokerClient, PrivateBrokerClient};
use crate::daemon::rpc_server::{
    bind_socket, run_private_listener, run_public_listener, PRIVATE_SOCKET_MODE,
};
use crate::identity::{IdentityResolver, LocalAccount, PeerCredResolver, UserDirectory, UserResolver};
use crate::rpc::BrokerResult;
use crate::service::testing::FakeServiceManager;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::UnixStream;
use tokio::sync::broadcast;

/// Reports the same uid for every connection.
pub struct FixedUid(pub u32);

impl IdentityResolver for FixedUid {
    fn caller_uid(&self, _stream: &UnixStream) -> BrokerResult<u32> {
        Ok(self.0)
    }
}

/// Test harness that runs both broker services on temporary sockets.
pub struct TestBroker {
    pub paths: BrokerPaths,
    pub service: Arc<FakeServiceManager>,
    pub broker: BrokerHandle,
    pub local: LocalAccount,
    shutdown_tx: broadcast::Sender<()>,
    _dir: TempDir,
}

impl TestBroker {
    /// Start a broker whose callers are identified by their socket credentials.
    pub async fn start() -> Self {
        Self::start_with(Arc::new(PeerCredResolver), None).await
    }

    pub async fn start_with(
        identity: Arc<dyn IdentityResolver>,
        directory: Option<Arc<dyn UserDirectory>>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = BrokerPaths::at(dir.path().to_path_buf());
        let service = Arc::new(FakeServiceManager::default());
        let local = LocalAccount::current().unwrap();

        let (broker, _join) = BrokerHandle::spawn(
            service.clone(),
            Arc::new(ProcessLifetime::new(INACTIVITY_TIMEOUT)),
            crate::broker::login_tokens::LoginTokenStore::new(TOKEN_EXPIRE_TIME),
            BrokerTimings {
                stop_grace: Duration::from_secs(60),
                reconcile_interval: Duration::from_secs(5),
                poll_interval: Duration::from_millis(20),
            },
            UserResolver::new(local.clone(), directory),
        )
        .await
        .unwrap();

        let public = bind_socket(&paths.public_socket(), PRIVATE_SOCKET_MODE).unwrap();
        let private = bind_socket(&paths.private_socket(), PRIVATE_SOCKET_MODE).unwrap();
        let (shutdown_tx, _) = broadcast::channel(1);
        tokio::spawn(run_public_listener(
            public,
            broker.clone(),
            identity,
            shutdown_tx.clone(),
        ));
        tokio::spawn(run_private_listener(
            private,
            broker.clone(),
            shutdown_tx.clone(),
        ));

        Self {
            paths,
            service,
            broker,
            local,
            shutdown_tx,
            _dir: dir,
        }
    }

    pub async fn client(&self) -> BrokerClient {
        BrokerClient::connect(&self.paths.public_socket())
            .await
            .unwrap()
    }

    pub async fn private_client(&self) -> PrivateBrokerClient {
        PrivateBrokerClient::connect(&self.paths.private_socket())
            .await
            .unwrap()
    }

    /// Poll the controller until it reports `expected` held clients.
    pub async fn wait_for_client_count(&self, expected: usize) {
        for _ in 0..200 {
            if self.broker.client_count().await.unwrap() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "client count never reached {}, stuck at {}",
            expected,
            self.broker.client_count().await.unwrap()
        );
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        self.broker.shutdown();
    }
}
