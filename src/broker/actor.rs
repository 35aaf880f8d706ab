//! Broker actor: serializes every controller operation into actor turns.
//!
//! Client requests, the reconcile and change-poll ticks, stop-grace expiries
//! and disconnect notifications all arrive as [`BrokerMessage`]s, so the
//! [`SessionController`] never needs a lock.

use crate::broker::controller::SessionController;
use crate::broker::lifetime::ProcessLifetime;
use crate::broker::login_tokens::LoginTokenStore;
use crate::broker::stop_grace::{ScheduledTask, Scheduler};
use crate::broker::types::{BrokerProperties, ClientId, UserDetail};
use crate::config::BrokerConfig;
use crate::identity::UserResolver;
use crate::rpc::{BrokerError, BrokerResult};
use crate::service::ServiceManager;
use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Messages handled by the broker actor.
pub enum BrokerMessage {
    Hold(ClientId, oneshot::Sender<()>),
    Release(ClientId, oneshot::Sender<()>),
    /// The transport closed the client's connection.
    ClientVanished(ClientId),
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    /// A public call arrived; counts as activity before any other work.
    Touch(oneshot::Sender<()>),
    /// Issue a token for an already resolved user; replies with the key.
    IssueLoginToken(UserDetail, oneshot::Sender<String>),
    CheckLoginToken(String, oneshot::Sender<Option<UserDetail>>),
    Reconcile,
    PollChanges,
    StopGraceElapsed(u64),
    #[cfg(test)]
    ClientCount(oneshot::Sender<usize>),
}

/// Timing knobs of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerTimings {
    pub stop_grace: Duration,
    pub reconcile_interval: Duration,
    pub poll_interval: Duration,
}

impl From<&BrokerConfig> for BrokerTimings {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            stop_grace: config.stop_grace(),
            reconcile_interval: config.reconcile_interval(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Arguments for spawning the broker actor.
pub struct BrokerActorArgs {
    pub service: Arc<dyn ServiceManager>,
    pub lifetime: Arc<ProcessLifetime>,
    pub login_tokens: LoginTokenStore,
    pub timings: BrokerTimings,
    pub properties: watch::Sender<BrokerProperties>,
}

pub struct BrokerActorState {
    controller: SessionController,
    timings: BrokerTimings,
    timers: Vec<JoinHandle<()>>,
}

/// Delivers stop-grace expiries back into the actor's mailbox.
struct ActorScheduler {
    actor: ActorRef<BrokerMessage>,
}

impl Scheduler for ActorScheduler {
    fn schedule_stop_grace(&self, delay: Duration, epoch: u64) -> ScheduledTask {
        let handle = self
            .actor
            .send_after(delay, move || BrokerMessage::StopGraceElapsed(epoch));
        ScheduledTask::new(handle.abort_handle())
    }
}

pub struct BrokerActor;

#[async_trait]
impl Actor for BrokerActor {
    type Msg = BrokerMessage;
    type State = BrokerActorState;
    type Arguments = BrokerActorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let scheduler = ActorScheduler {
            actor: myself.clone(),
        };
        let controller = SessionController::new(
            args.service,
            args.lifetime,
            args.login_tokens,
            args.timings.stop_grace,
            Box::new(scheduler),
            args.properties,
        );
        Ok(BrokerActorState {
            controller,
            timings: args.timings,
            timers: Vec::new(),
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.timers.push(
            myself.send_interval(state.timings.reconcile_interval, || BrokerMessage::Reconcile),
        );
        state
            .timers
            .push(myself.send_interval(state.timings.poll_interval, || BrokerMessage::PollChanges));
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for timer in state.timers.drain(..) {
            timer.abort();
        }
        state.controller.shutdown();
        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let controller = &mut state.controller;
        match message {
            BrokerMessage::Hold(client, reply) => {
                controller.hold_client(client);
                reply_to(reply, ());
            }
            BrokerMessage::Release(client, reply) => {
                controller.release_client(client);
                reply_to(reply, ());
            }
            BrokerMessage::ClientVanished(client) => controller.client_vanished(client),
            BrokerMessage::Start(reply) => {
                controller.start();
                reply_to(reply, ());
            }
            BrokerMessage::Stop(reply) => {
                controller.stop();
                reply_to(reply, ());
            }
            BrokerMessage::Touch(reply) => {
                controller.touch();
                reply_to(reply, ());
            }
            BrokerMessage::IssueLoginToken(user, reply) => {
                reply_to(reply, controller.issue_login_token(user));
            }
            BrokerMessage::CheckLoginToken(key, reply) => {
                reply_to(reply, controller.check_login_token(&key));
            }
            BrokerMessage::Reconcile => controller.reconcile(),
            BrokerMessage::PollChanges => controller.poll_changes(),
            BrokerMessage::StopGraceElapsed(epoch) => controller.stop_grace_elapsed(epoch),
            #[cfg(test)]
            BrokerMessage::ClientCount(reply) => reply_to(reply, controller.client_count()),
        }
        Ok(())
    }
}

fn reply_to<T>(reply: oneshot::Sender<T>, value: T) {
    if reply.send(value).is_err() {
        tracing::debug!("Broker reply channel closed");
    }
}

/// Cloneable front door to the broker actor, shared by all RPC connections.
#[derive(Clone)]
pub struct BrokerHandle {
    actor: ActorRef<BrokerMessage>,
    users: UserResolver,
    properties: watch::Receiver<BrokerProperties>,
}

impl BrokerHandle {
    /// Spawn the broker actor. The returned join handle completes once the
    /// actor has stopped and the controller has shut down.
    pub async fn spawn(
        service: Arc<dyn ServiceManager>,
        lifetime: Arc<ProcessLifetime>,
        login_tokens: LoginTokenStore,
        timings: BrokerTimings,
        users: UserResolver,
    ) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let (properties_tx, properties) =
            watch::channel(BrokerProperties::from(service.properties()));
        let args = BrokerActorArgs {
            service,
            lifetime,
            login_tokens,
            timings,
            properties: properties_tx,
        };
        let (actor, join) = Actor::spawn(None, BrokerActor, args)
            .await
            .map_err(|err| anyhow::anyhow!("Failed to spawn broker actor: {}", err))?;
        Ok((
            Self {
                actor,
                users,
                properties,
            },
            join,
        ))
    }

    pub async fn hold(&self, client: ClientId) -> BrokerResult<()> {
        self.call(|reply| BrokerMessage::Hold(client, reply)).await
    }

    pub async fn release(&self, client: ClientId) -> BrokerResult<()> {
        self.call(|reply| BrokerMessage::Release(client, reply)).await
    }

    pub fn client_vanished(&self, client: ClientId) {
        if self
            .actor
            .send_message(BrokerMessage::ClientVanished(client))
            .is_err()
        {
            tracing::debug!(%client, "broker gone before disconnect was reported");
        }
    }

    pub async fn start(&self) -> BrokerResult<()> {
        self.call(BrokerMessage::Start).await
    }

    pub async fn stop(&self) -> BrokerResult<()> {
        self.call(BrokerMessage::Stop).await
    }

    /// Resolve the caller and issue a login token for them.
    ///
    /// Resolution may read the user directory, so it happens here in the
    /// request task rather than inside an actor turn. The call counts as
    /// activity even when the caller cannot be resolved.
    pub async fn get_login_token(&self, caller_uid: BrokerResult<u32>) -> BrokerResult<String> {
        self.call(BrokerMessage::Touch).await?;
        let user = self.users.user_detail(caller_uid?).await?;
        self.call(|reply| BrokerMessage::IssueLoginToken(user, reply))
            .await
    }

    pub async fn check_login_token(&self, key: String) -> BrokerResult<Option<UserDetail>> {
        self.call(|reply| BrokerMessage::CheckLoginToken(key, reply))
            .await
    }

    pub fn properties(&self) -> BrokerProperties {
        self.properties.borrow().clone()
    }

    /// Stop the actor, which shuts the controller down.
    pub fn shutdown(&self) {
        self.actor.stop(Some("daemon shutting down".to_string()));
    }

    #[cfg(test)]
    pub async fn client_count(&self) -> BrokerResult<usize> {
        self.call(BrokerMessage::ClientCount).await
    }

    async fn call<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> BrokerMessage,
    ) -> BrokerResult<T> {
        let (tx, rx) = oneshot::channel();
        self.actor
            .send_message(message(tx))
            .map_err(|_| BrokerError::Unavailable)?;
        rx.await.map_err(|_| BrokerError::Unavailable)
    }
}

#[cfg(test)]
#[path = "tests/actor_tests.rs"]
mod tests;
