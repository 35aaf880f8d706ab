//! Keeps the daemon process alive while it has work to do.
//!
//! Two mechanisms decide when the process may exit:
//! - a set of [`HoldToken`]s; each distinct token counts once toward the use count
//! - an inactivity watchdog reset by every inbound call
//!
//! The process becomes eligible to exit only when the use count is zero and the
//! watchdog has elapsed since the last activity.

use crate::broker::types::HoldToken;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Default inactivity timeout before an unheld daemon exits.
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);

struct LifetimeState {
    tokens: HashSet<HoldToken>,
    last_activity: Instant,
}

pub struct ProcessLifetime {
    state: Mutex<LifetimeState>,
    changed: Notify,
    inactivity_timeout: Duration,
}

impl ProcessLifetime {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(LifetimeState {
                tokens: HashSet::new(),
                last_activity: Instant::now(),
            }),
            changed: Notify::new(),
            inactivity_timeout,
        }
    }

    /// Assert `token`. Returns true on the transition from absent to present.
    pub fn hold_with_token(&self, token: HoldToken) -> bool {
        let added = {
            let mut state = self.lock_state();
            let was_idle = state.tokens.is_empty();
            let added = state.tokens.insert(token.clone());
            if added && was_idle {
                tracing::debug!(%token, "process hold acquired");
            }
            added
        };
        if added {
            self.changed.notify_waiters();
        }
        added
    }

    /// Retract `token`. Returns true on the transition from present to absent.
    pub fn release_with_token(&self, token: &HoldToken) -> bool {
        let removed = {
            let mut state = self.lock_state();
            let removed = state.tokens.remove(token);
            if removed {
                // Releasing the last hold starts the inactivity countdown afresh.
                state.last_activity = Instant::now();
                if state.tokens.is_empty() {
                    tracing::debug!(%token, "process hold released");
                }
            }
            removed
        };
        if removed {
            self.changed.notify_waiters();
        }
        removed
    }

    /// Record inbound activity, pushing the idle exit further out.
    pub fn reset_inactivity_timeout(&self) {
        self.lock_state().last_activity = Instant::now();
        self.changed.notify_waiters();
    }

    #[cfg(test)]
    pub fn use_count(&self) -> usize {
        self.lock_state().tokens.len()
    }

    #[cfg(test)]
    pub fn is_held(&self, token: &HoldToken) -> bool {
        self.lock_state().tokens.contains(token)
    }

    /// Resolves once no hold tokens are asserted and the inactivity timeout has
    /// elapsed since the last activity.
    pub async fn idle_exit(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let state = self.lock_state();
                if state.tokens.is_empty() {
                    Some(state.last_activity + self.inactivity_timeout)
                } else {
                    None
                }
            };

            match deadline {
                Some(deadline) if Instant::now() >= deadline => return,
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = &mut notified => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LifetimeState> {
        // State updates cannot panic midway, so a poisoned lock still holds valid data.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
