//! Tests for the broker actor and its handle.

use super::*;
use crate::broker::controller::CONTROLLER_HOLD;
use crate::broker::lifetime::INACTIVITY_TIMEOUT;
use crate::broker::login_tokens::TOKEN_EXPIRE_TIME;
use crate::broker::types::ServiceStatus;
use crate::identity::LocalAccount;
use crate::service::testing::FakeServiceManager;

const TIMINGS: BrokerTimings = BrokerTimings {
    stop_grace: Duration::from_secs(60),
    reconcile_interval: Duration::from_secs(5),
    poll_interval: Duration::from_secs(1),
};

struct Broker {
    handle: BrokerHandle,
    join: JoinHandle<()>,
    service: Arc<FakeServiceManager>,
    lifetime: Arc<ProcessLifetime>,
}

async fn spawn_broker(service: FakeServiceManager) -> Broker {
    let service = Arc::new(service);
    let lifetime = Arc::new(ProcessLifetime::new(INACTIVITY_TIMEOUT));
    let users = UserResolver::new(
        LocalAccount {
            uid: 1000,
            user_name: "alice".to_string(),
            full_name: "Alice".to_string(),
        },
        None,
    );
    let (handle, join) = BrokerHandle::spawn(
        service.clone(),
        lifetime.clone(),
        LoginTokenStore::new(TOKEN_EXPIRE_TIME),
        TIMINGS,
        users,
    )
    .await
    .expect("broker spawn failed");
    Broker {
        handle,
        join,
        service,
        lifetime,
    }
}

#[tokio::test(start_paused = true)]
async fn test_hold_and_release_are_counted_per_client() {
    let broker = spawn_broker(FakeServiceManager::default()).await;

    broker.handle.hold(ClientId(1)).await.unwrap();
    broker.handle.hold(ClientId(1)).await.unwrap();
    broker.handle.hold(ClientId(2)).await.unwrap();
    assert_eq!(broker.handle.client_count().await.unwrap(), 2);

    broker.handle.release(ClientId(1)).await.unwrap();
    broker.handle.release(ClientId(3)).await.unwrap();
    assert_eq!(broker.handle.client_count().await.unwrap(), 1);

    broker.handle.client_vanished(ClientId(2));
    assert_eq!(broker.handle.client_count().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unheld_service_stops_after_grace() {
    let broker = spawn_broker(FakeServiceManager::running()).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(broker.service.stop_calls(), 0);

    tokio::time::sleep(Duration::from_secs(45)).await;
    assert_eq!(broker.service.stop_calls(), 1);
    assert_eq!(broker.service.status(), ServiceStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_held_service_keeps_running() {
    let broker = spawn_broker(FakeServiceManager::running()).await;
    broker.handle.hold(ClientId(1)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(300)).await;

    assert_eq!(broker.service.stop_calls(), 0);
    assert!(broker.lifetime.is_held(&CONTROLLER_HOLD));
}

#[tokio::test(start_paused = true)]
async fn test_hold_during_grace_cancels_stop() {
    let broker = spawn_broker(FakeServiceManager::running()).await;

    // Grace armed on the first reconcile tick
    tokio::time::sleep(Duration::from_secs(20)).await;
    broker.handle.hold(ClientId(1)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(broker.service.stop_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_restarts_grace() {
    let broker = spawn_broker(FakeServiceManager::running()).await;
    broker.handle.hold(ClientId(1)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(100)).await;

    broker.handle.client_vanished(ClientId(1));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(broker.service.stop_calls(), 0);

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(broker.service.stop_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_and_stop_requests() {
    let broker = spawn_broker(FakeServiceManager::default()).await;

    broker.handle.start().await.unwrap();
    assert_eq!(broker.service.status(), ServiceStatus::Running);

    broker.handle.stop().await.unwrap();
    assert_eq!(broker.service.status(), ServiceStatus::Stopped);
    assert_eq!(broker.service.start_calls(), 1);
    assert_eq!(broker.service.stop_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_properties_follow_service_changes() {
    let broker = spawn_broker(FakeServiceManager::default()).await;
    assert_eq!(broker.handle.properties().status, "STOPPED");
    assert_eq!(broker.handle.properties().app_key, "fake-app-key");

    broker.service.set_status(ServiceStatus::Running);
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(broker.handle.properties().status, "RUNNING");
}

#[tokio::test(start_paused = true)]
async fn test_login_token_for_local_user() {
    let broker = spawn_broker(FakeServiceManager::default()).await;

    let key = broker.handle.get_login_token(Ok(1000)).await.unwrap();
    assert!(key.starts_with("1000:"));

    let user = broker.handle.check_login_token(key.clone()).await.unwrap();
    assert_eq!(user.map(|user| user.user_name), Some("alice".to_string()));
    assert_eq!(broker.handle.check_login_token(key).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_login_token_for_unknown_user_fails() {
    let broker = spawn_broker(FakeServiceManager::default()).await;

    let err = broker.handle.get_login_token(Ok(1001)).await.unwrap_err();
    assert!(matches!(err, BrokerError::IdentityResolution { .. }));

    let unresolved = BrokerError::IdentityResolution {
        message: "peer credentials unavailable".to_string(),
    };
    let err = broker
        .handle
        .get_login_token(Err(unresolved.clone()))
        .await
        .unwrap_err();
    assert_eq!(err, unresolved);
}

#[tokio::test(start_paused = true)]
async fn test_refused_login_token_still_counts_as_activity() {
    let broker = spawn_broker(FakeServiceManager::default()).await;
    let started = tokio::time::Instant::now();

    tokio::time::sleep(Duration::from_secs(20)).await;
    let err = broker.handle.get_login_token(Ok(4242)).await.unwrap_err();
    assert!(matches!(err, BrokerError::IdentityResolution { .. }));

    broker.lifetime.idle_exit().await;
    assert!(started.elapsed() >= Duration::from_secs(20) + INACTIVITY_TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_service_and_rejects_calls() {
    let broker = spawn_broker(FakeServiceManager::running()).await;
    broker.handle.hold(ClientId(1)).await.unwrap();

    broker.handle.shutdown();
    broker.join.await.unwrap();

    assert_eq!(broker.service.stop_calls(), 1);
    assert!(!broker.lifetime.is_held(&CONTROLLER_HOLD));
    assert_eq!(
        broker.handle.hold(ClientId(2)).await,
        Err(BrokerError::Unavailable)
    );
}

#[tokio::test(start_paused = true)]
async fn test_idle_daemon_becomes_eligible_to_exit() {
    let broker = spawn_broker(FakeServiceManager::default()).await;
    let started = tokio::time::Instant::now();

    broker.lifetime.idle_exit().await;

    assert!(started.elapsed() >= INACTIVITY_TIMEOUT);
    assert!(!broker.lifetime.is_held(&CONTROLLER_HOLD));
}
