//! User directory backed by the system account databases.
//!
//! Lookups go through NSS (`getpwuid_r`/`getgrnam_r`), so accounts served by
//! LDAP, sssd or systemd-homed resolve the same way as local ones.

use super::{first_gecos_field, UserDirectory};
use crate::broker::types::UserDetail;
use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::unistd::{Group, Uid, User};
use std::sync::Arc;

/// The fields of a user account the broker cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub name: String,
    pub gid: u32,
    pub gecos: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub gid: u32,
    pub members: Vec<String>,
}

/// Blocking access to the account databases.
pub trait AccountDatabase: Send + Sync {
    fn user_by_uid(&self, uid: u32) -> Result<Option<AccountRecord>>;
    fn group_by_name(&self, name: &str) -> Result<Option<GroupRecord>>;
}

/// The host's account databases, via NSS.
pub struct NssAccounts;

impl AccountDatabase for NssAccounts {
    fn user_by_uid(&self, uid: u32) -> Result<Option<AccountRecord>> {
        let user = User::from_uid(Uid::from_raw(uid))
            .with_context(|| format!("Failed to look up uid {}", uid))?;
        Ok(user.map(|user| AccountRecord {
            gid: user.gid.as_raw(),
            gecos: user.gecos.to_string_lossy().into_owned(),
            name: user.name,
        }))
    }

    fn group_by_name(&self, name: &str) -> Result<Option<GroupRecord>> {
        let group =
            Group::from_name(name).with_context(|| format!("Failed to look up group {}", name))?;
        Ok(group.map(|group| GroupRecord {
            gid: group.gid.as_raw(),
            members: group.mem,
        }))
    }
}

pub struct SystemDirectory {
    accounts: Arc<dyn AccountDatabase>,
    admin_groups: Arc<[String]>,
}

impl SystemDirectory {
    pub fn new(admin_groups: Vec<String>) -> Self {
        Self::with_accounts(Arc::new(NssAccounts), admin_groups)
    }

    pub fn with_accounts(accounts: Arc<dyn AccountDatabase>, admin_groups: Vec<String>) -> Self {
        Self {
            accounts,
            admin_groups: admin_groups.into(),
        }
    }
}

#[async_trait]
impl UserDirectory for SystemDirectory {
    async fn user_by_id(&self, uid: u32) -> Result<UserDetail> {
        let accounts = self.accounts.clone();
        let admin_groups = self.admin_groups.clone();
        // NSS modules may block on the network
        tokio::task::spawn_blocking(move || lookup(accounts.as_ref(), &admin_groups, uid))
            .await
            .context("Account lookup task failed")?
    }
}

fn lookup(accounts: &dyn AccountDatabase, admin_groups: &[String], uid: u32) -> Result<UserDetail> {
    let account = accounts
        .user_by_uid(uid)?
        .with_context(|| format!("no user with uid {}", uid))?;

    let mut is_admin = false;
    for name in admin_groups {
        if let Some(group) = accounts.group_by_name(name)? {
            if group.gid == account.gid || group.members.contains(&account.name) {
                is_admin = true;
                break;
            }
        }
    }

    Ok(UserDetail {
        user_id: uid,
        full_name: first_gecos_field(&account.gecos),
        user_name: account.name,
        is_admin,
    })
}
