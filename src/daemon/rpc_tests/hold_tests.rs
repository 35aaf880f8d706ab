use super::*;

#[tokio::test]
async fn test_hold_is_per_connection_and_idempotent() {
    let broker = TestBroker::start().await;
    let first = broker.client().await;
    let second = broker.client().await;

    first.hold().await.unwrap();
    first.hold().await.unwrap();
    assert_eq!(broker.broker.client_count().await.unwrap(), 1);

    second.hold().await.unwrap();
    assert_eq!(broker.broker.client_count().await.unwrap(), 2);

    first.release().await.unwrap();
    first.release().await.unwrap();
    assert_eq!(broker.broker.client_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_release_without_hold_is_noop() {
    let broker = TestBroker::start().await;
    let client = broker.client().await;

    client.release().await.unwrap();

    assert_eq!(broker.broker.client_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_disconnect_releases_hold() {
    let broker = TestBroker::start().await;
    let holder = broker.client().await;
    let bystander = broker.client().await;
    holder.hold().await.unwrap();
    bystander.hold().await.unwrap();

    drop(holder);

    broker.wait_for_client_count(1).await;
}

#[tokio::test]
async fn test_unheld_disconnect_is_ignored() {
    let broker = TestBroker::start().await;
    let holder = broker.client().await;
    holder.hold().await.unwrap();

    let passerby = broker.client().await;
    passerby.properties().await.unwrap();
    drop(passerby);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(broker.broker.client_count().await.unwrap(), 1);
}
