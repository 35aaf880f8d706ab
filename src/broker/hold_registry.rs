//! Registry of clients currently holding the session.
//!
//! An entry doubles as the client's disconnect watch: the transport reports
//! every closed connection through [`HoldRegistry::client_vanished`], and only
//! connections with an entry are acted upon.

use crate::broker::types::ClientId;
use std::collections::HashMap;
use tokio::time::Instant;

#[derive(Debug)]
struct HeldClient {
    since: Instant,
}

#[derive(Debug, Default)]
pub struct HoldRegistry {
    clients: HashMap<ClientId, HeldClient>,
}

impl HoldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the session for `client`. Returns false if it was already held.
    pub fn hold(&mut self, client: ClientId) -> bool {
        if self.clients.contains_key(&client) {
            return false;
        }
        self.clients.insert(
            client,
            HeldClient {
                since: Instant::now(),
            },
        );
        tracing::debug!(%client, count = self.clients.len(), "client hold added");
        true
    }

    /// Release the hold for `client`. Returns false if it was not held.
    pub fn release(&mut self, client: ClientId) -> bool {
        match self.clients.remove(&client) {
            Some(held) => {
                tracing::debug!(
                    %client,
                    held_for = ?held.since.elapsed(),
                    count = self.clients.len(),
                    "client hold released"
                );
                true
            }
            None => false,
        }
    }

    /// The client's connection went away.
    pub fn client_vanished(&mut self, client: ClientId) -> bool {
        self.release(client)
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    #[cfg(test)]
    pub fn is_held(&self, client: ClientId) -> bool {
        self.clients.contains_key(&client)
    }
}
