use super::*;
use crate::identity::accounts::testing::StaticAccounts;
use crate::identity::SystemDirectory;

#[tokio::test]
async fn test_login_token_round_trip_for_local_user() {
    let broker = TestBroker::start().await;
    let client = broker.client().await;
    client.hold().await.unwrap();

    let key = client.get_login_token().await.unwrap();
    assert!(key.starts_with(&format!("{}:", broker.local.uid)));

    let private = broker.private_client().await;
    let user = private.check_login_token(&key).await.unwrap().unwrap();
    assert_eq!(user, broker.local.detail());
    assert!(user.is_admin);

    assert_eq!(private.check_login_token(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_new_token_replaces_previous() {
    let broker = TestBroker::start().await;
    let client = broker.client().await;
    let private = broker.private_client().await;

    let first = client.get_login_token().await.unwrap();
    let second = client.get_login_token().await.unwrap();
    assert_ne!(first, second);

    assert_eq!(private.check_login_token(&first).await.unwrap(), None);
    assert!(private.check_login_token(&second).await.unwrap().is_some());
}

#[tokio::test]
async fn test_forged_key_is_rejected() {
    let broker = TestBroker::start().await;
    let client = broker.client().await;
    let private = broker.private_client().await;

    let key = client.get_login_token().await.unwrap();
    let forged = format!("{}:{}", broker.local.uid, "0".repeat(32));

    assert_eq!(private.check_login_token(&forged).await.unwrap(), None);
    assert_eq!(private.check_login_token("garbage").await.unwrap(), None);
    assert!(private.check_login_token(&key).await.unwrap().is_some());
}

#[tokio::test]
async fn test_unresolvable_caller_gets_identity_error() {
    let broker = TestBroker::start_with(Arc::new(FixedUid(4242)), None).await;
    let client = broker.client().await;

    let err = client.get_login_token().await.unwrap_err();

    assert!(err.to_string().contains("Cannot resolve caller identity"));
}

#[tokio::test]
async fn test_other_user_resolved_through_directory() {
    let accounts = StaticAccounts::default()
        .user(4242, "dave", 4242, "Dave Example,,,")
        .group("dave", 4242, &[])
        .group("wheel", 10, &["dave"]);
    let directory = Arc::new(SystemDirectory::with_accounts(
        Arc::new(accounts),
        vec!["wheel".to_string()],
    ));

    let broker = TestBroker::start_with(Arc::new(FixedUid(4242)), Some(directory)).await;
    let key = broker.client().await.get_login_token().await.unwrap();
    assert!(key.starts_with("4242:"));

    let user = broker
        .private_client()
        .await
        .check_login_token(&key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.user_name, "dave");
    assert_eq!(user.full_name, "Dave Example");
    assert!(user.is_admin);
}
