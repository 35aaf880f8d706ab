//! Session controller: decides when the managed service runs.
//!
//! The controller is plain owned state. It is driven one call at a time by the
//! broker actor, which feeds it client requests, the periodic reconcile and
//! change-poll ticks and stop-grace expiries.

use crate::broker::hold_registry::HoldRegistry;
use crate::broker::lifetime::ProcessLifetime;
use crate::broker::login_tokens::LoginTokenStore;
use crate::broker::stop_grace::{Scheduler, StopGraceTimer};
use crate::broker::types::{BrokerProperties, ClientId, HoldToken, ServiceStatus, UserDetail};
use crate::daemon_log::daemon_log;
use crate::service::ServiceManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Asserted on the process lifetime while the controller has clients or a
/// running service.
pub const CONTROLLER_HOLD: HoldToken = HoldToken::from_static("session-controller");

pub struct SessionController {
    registry: HoldRegistry,
    login_tokens: LoginTokenStore,
    service: Arc<dyn ServiceManager>,
    lifetime: Arc<ProcessLifetime>,
    stop_grace: StopGraceTimer,
    scheduler: Box<dyn Scheduler>,
    properties: watch::Sender<BrokerProperties>,
}

impl SessionController {
    pub fn new(
        service: Arc<dyn ServiceManager>,
        lifetime: Arc<ProcessLifetime>,
        login_tokens: LoginTokenStore,
        stop_grace: Duration,
        scheduler: Box<dyn Scheduler>,
        properties: watch::Sender<BrokerProperties>,
    ) -> Self {
        Self {
            registry: HoldRegistry::new(),
            login_tokens,
            service,
            lifetime,
            stop_grace: StopGraceTimer::new(stop_grace),
            scheduler,
            properties,
        }
    }

    /// Start the service unless it is already up or on its way.
    pub fn start(&mut self) {
        self.lifetime.reset_inactivity_timeout();
        if matches!(
            self.service.status(),
            ServiceStatus::Stopped | ServiceStatus::Error
        ) {
            daemon_log("controller", "Starting service");
            self.service.start_service();
        }
    }

    /// Stop the service now, without waiting for the grace period.
    pub fn stop(&mut self) {
        self.lifetime.reset_inactivity_timeout();
        self.stop_grace.disarm();
        self.request_stop();
    }

    pub fn hold_client(&mut self, client: ClientId) {
        self.lifetime.reset_inactivity_timeout();
        if self.registry.hold(client) {
            self.sync_process_hold();
        }
    }

    pub fn release_client(&mut self, client: ClientId) {
        self.lifetime.reset_inactivity_timeout();
        self.registry.release(client);
    }

    /// The transport lost `client`'s connection.
    pub fn client_vanished(&mut self, client: ClientId) {
        if self.registry.client_vanished(client) {
            daemon_log("controller", &format!("Client {} vanished while holding", client));
        }
    }

    /// Record client activity without changing any state.
    pub fn touch(&mut self) {
        self.lifetime.reset_inactivity_timeout();
    }

    /// Issue a login token for an already resolved user, returning its key.
    pub fn issue_login_token(&mut self, user: UserDetail) -> String {
        self.lifetime.reset_inactivity_timeout();
        self.login_tokens.generate_for_user(user).key
    }

    /// Redeem a login token.
    pub fn check_login_token(&mut self, key: &str) -> Option<UserDetail> {
        self.lifetime.reset_inactivity_timeout();
        self.login_tokens.pop_login_token(key).map(|token| token.user)
    }

    /// Periodic reconciliation of the service against the current holds.
    pub fn reconcile(&mut self) {
        if let Err(err) = self.service.cleanup() {
            tracing::warn!(error = %err, "service cleanup failed");
        }

        if self.registry.count() == 0 && self.service.is_running() {
            if self.stop_grace.arm(self.scheduler.as_ref()) {
                daemon_log(
                    "controller",
                    &format!(
                        "No clients left; stopping service in {:?}",
                        self.stop_grace.interval()
                    ),
                );
            }
        } else {
            self.stop_grace.disarm();
        }

        self.sync_process_hold();
    }

    /// Publish the service properties if they changed since the last poll.
    pub fn poll_changes(&mut self) {
        if self.service.pop_has_changes() {
            let properties = BrokerProperties::from(self.service.properties());
            tracing::debug!(status = %properties.status, "publishing broker properties");
            self.properties.send_replace(properties);
        }
    }

    /// The stop-grace delay armed with `epoch` elapsed.
    pub fn stop_grace_elapsed(&mut self, epoch: u64) {
        if !self.stop_grace.take_expired(epoch) {
            return;
        }
        if self.registry.count() == 0 {
            daemon_log("controller", "Stop grace elapsed with no clients; stopping service");
            self.request_stop();
        }
    }

    /// Tear down before the daemon exits.
    pub fn shutdown(&mut self) {
        self.stop_grace.disarm();
        self.request_stop();
        self.lifetime.release_with_token(&CONTROLLER_HOLD);
    }

    #[cfg(test)]
    pub fn client_count(&self) -> usize {
        self.registry.count()
    }

    #[cfg(test)]
    pub fn is_stop_grace_armed(&self) -> bool {
        self.stop_grace.is_armed()
    }

    fn request_stop(&self) {
        if matches!(
            self.service.status(),
            ServiceStatus::Starting | ServiceStatus::Running
        ) {
            daemon_log("controller", "Stopping service");
            self.service.stop_service();
        }
    }

    fn sync_process_hold(&self) {
        if self.registry.count() > 0 || self.service.is_running() {
            self.lifetime.hold_with_token(CONTROLLER_HOLD);
        } else {
            self.lifetime.release_with_token(&CONTROLLER_HOLD);
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
