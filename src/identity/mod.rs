//! Mapping callers to user identities.
//!
//! The transport learns a caller's uid when it accepts the connection
//! ([`IdentityResolver`]). Turning that uid into a [`UserDetail`] either hits
//! the daemon owner's own account, resolved once at startup, or goes to the
//! [`UserDirectory`].

pub mod accounts;

use crate::broker::types::UserDetail;
use crate::rpc::{BrokerError, BrokerResult};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::UnixStream;

pub use accounts::SystemDirectory;

/// Looks up other users' accounts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_by_id(&self, uid: u32) -> Result<UserDetail>;
}

/// Determines the uid of the peer on an accepted connection.
pub trait IdentityResolver: Send + Sync {
    fn caller_uid(&self, stream: &UnixStream) -> BrokerResult<u32>;
}

/// Reads the peer's credentials from the socket (`SO_PEERCRED`).
pub struct PeerCredResolver;

impl IdentityResolver for PeerCredResolver {
    fn caller_uid(&self, stream: &UnixStream) -> BrokerResult<u32> {
        stream
            .peer_cred()
            .map(|cred| cred.uid())
            .map_err(|err| BrokerError::IdentityResolution {
                message: format!("peer credentials unavailable: {}", err),
            })
    }
}

/// The account the daemon runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAccount {
    pub uid: u32,
    pub user_name: String,
    pub full_name: String,
}

impl LocalAccount {
    pub fn current() -> Result<Self> {
        use anyhow::Context;
        use nix::unistd::{getuid, User};

        let uid = getuid();
        let user = User::from_uid(uid).context("Failed to look up the daemon's own account")?;
        Ok(match user {
            Some(user) => Self {
                uid: uid.as_raw(),
                full_name: first_gecos_field(&user.gecos.to_string_lossy()),
                user_name: user.name,
            },
            None => Self {
                uid: uid.as_raw(),
                user_name: uid.to_string(),
                full_name: String::new(),
            },
        })
    }

    /// The daemon owner is trusted and always reported as an administrator.
    pub fn detail(&self) -> UserDetail {
        UserDetail {
            user_id: self.uid,
            user_name: self.user_name.clone(),
            full_name: self.full_name.clone(),
            is_admin: true,
        }
    }
}

/// The GECOS field is comma separated; the first entry is the full name.
pub(crate) fn first_gecos_field(gecos: &str) -> String {
    gecos.split(',').next().unwrap_or_default().trim().to_string()
}

/// Resolves uids to user details for login token issuance.
#[derive(Clone)]
pub struct UserResolver {
    local: LocalAccount,
    directory: Option<Arc<dyn UserDirectory>>,
}

impl UserResolver {
    pub fn new(local: LocalAccount, directory: Option<Arc<dyn UserDirectory>>) -> Self {
        Self { local, directory }
    }

    pub async fn user_detail(&self, uid: u32) -> BrokerResult<UserDetail> {
        if uid == self.local.uid {
            return Ok(self.local.detail());
        }
        let Some(directory) = &self.directory else {
            return Err(BrokerError::IdentityResolution {
                message: format!("no user directory to resolve uid {}", uid),
            });
        };
        directory
            .user_by_id(uid)
            .await
            .map_err(|err| BrokerError::IdentityResolution {
                message: format!("{:#}", err),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticDirectory(Vec<UserDetail>);

    #[async_trait]
    impl UserDirectory for StaticDirectory {
        async fn user_by_id(&self, uid: u32) -> Result<UserDetail> {
            self.0
                .iter()
                .find(|user| user.user_id == uid)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no user with uid {}", uid))
        }
    }

    fn local() -> LocalAccount {
        LocalAccount {
            uid: 1000,
            user_name: "alice".to_string(),
            full_name: "Alice Example".to_string(),
        }
    }

    fn bob() -> UserDetail {
        UserDetail {
            user_id: 1001,
            user_name: "bob".to_string(),
            full_name: "Bob".to_string(),
            is_admin: false,
        }
    }

    #[tokio::test]
    async fn test_local_account_is_admin() {
        let resolver = UserResolver::new(local(), None);
        let detail = resolver.user_detail(1000).await.unwrap();
        assert_eq!(detail.user_name, "alice");
        assert!(detail.is_admin);
    }

    #[tokio::test]
    async fn test_other_user_goes_to_directory() {
        let directory = Arc::new(StaticDirectory(vec![bob()]));
        let resolver = UserResolver::new(local(), Some(directory));
        assert_eq!(resolver.user_detail(1001).await.unwrap(), bob());
    }

    #[tokio::test]
    async fn test_other_user_without_directory_fails() {
        let resolver = UserResolver::new(local(), None);
        let err = resolver.user_detail(1001).await.unwrap_err();
        assert!(matches!(err, BrokerError::IdentityResolution { .. }));
    }

    #[tokio::test]
    async fn test_directory_miss_is_identity_error() {
        let resolver = UserResolver::new(local(), Some(Arc::new(StaticDirectory(vec![]))));
        let err = resolver.user_detail(4242).await.unwrap_err();
        assert_eq!(
            err,
            BrokerError::IdentityResolution {
                message: "no user with uid 4242".to_string()
            }
        );
    }

    #[test]
    fn test_current_account_matches_process_uid() {
        let account = LocalAccount::current().unwrap();
        assert_eq!(account.uid, nix::unistd::getuid().as_raw());
    }

    #[test]
    fn test_first_gecos_field() {
        assert_eq!(first_gecos_field("Alice Example,Room 1,555"), "Alice Example");
        assert_eq!(first_gecos_field(""), "");
    }

    #[tokio::test]
    async fn test_peer_cred_resolver_reports_own_uid() {
        let (a, _b) = UnixStream::pair().unwrap();
        let uid = PeerCredResolver.caller_uid(&a).unwrap();
        assert_eq!(uid, nix::unistd::getuid().as_raw());
    }
}
