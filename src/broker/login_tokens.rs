//! Short-lived, single-use login tokens.
//!
//! A token hands an identity resolved on the public surface over to a caller
//! of the private surface. Keys have the form `<user_id>:<random>` so that
//! redemption is a single lookup by user id followed by an exact key match.

use crate::broker::types::UserDetail;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Default lifetime of a login token.
pub const TOKEN_EXPIRE_TIME: Duration = Duration::from_secs(60);

/// Monotonic time source for token expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock backed by the tokio monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginToken {
    pub user: UserDetail,
    pub key: String,
    pub expires_at: Instant,
}

impl LoginToken {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

pub struct LoginTokenStore {
    /// At most one token per user id.
    tokens: HashMap<u32, LoginToken>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl LoginTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(MonotonicClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens: HashMap::new(),
            ttl,
            clock,
        }
    }

    /// Issue a token for `user`, replacing any token the user already had.
    pub fn generate_for_user(&mut self, user: UserDetail) -> LoginToken {
        self.revoke_expired_tokens();

        let user_id = user.user_id;
        let token = LoginToken {
            key: generate_token_key(user_id),
            expires_at: self.clock.now() + self.ttl,
            user,
        };
        if self.tokens.insert(user_id, token.clone()).is_some() {
            tracing::debug!(user_id, "replaced previous login token");
        }
        token
    }

    /// Redeem the token with exactly this key.
    ///
    /// Unknown, forged, expired and already redeemed keys all yield `None`.
    pub fn pop_login_token(&mut self, key: &str) -> Option<LoginToken> {
        self.revoke_expired_tokens();

        let (user_id, _) = key.split_once(':')?;
        let user_id: u32 = user_id.parse().ok()?;
        if self.tokens.get(&user_id)?.key != key {
            return None;
        }
        self.tokens.remove(&user_id)
    }

    /// Number of stored tokens, counting ones that expired but were not purged yet.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn revoke_expired_tokens(&mut self) {
        let now = self.clock.now();
        self.tokens.retain(|_, token| !token.is_expired(now));
    }
}

fn generate_token_key(user_id: u32) -> String {
    format!("{}:{}", user_id, Uuid::new_v4().simple())
}

/// Manually advanced clock for tests.
#[cfg(test)]
pub struct ManualClock {
    now: std::sync::Mutex<Instant>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: std::sync::Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

#[cfg(test)]
impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
#[path = "tests/login_tokens_tests.rs"]
mod tests;
