//! The poller's external handle: a command channel plus the spawned
//! task's `JoinHandle` (`spec.md` §4.9 "start/resume... introspection...
//! cancellation", §9 "actor-per-order").

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::PollerConfig;
use crate::dns::{DnsCheck, DnsResolver};

use super::machine;
use super::state::{OrderState, PollerState};

/// Commands the owner of a [`PollerHandle`] can send to the running task.
pub enum PollerCommand {
    /// Cancel at the next suspension point. No further callbacks fire.
    Cancel,
    /// Report the current state without interrupting the poller.
    Introspect(oneshot::Sender<PollerState>),
}

const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// A running order poller. Dropping this without calling [`Self::cancel`]
/// leaves the task running to completion; the task does not depend on
/// the handle staying alive.
pub struct PollerHandle {
    commands: mpsc::Sender<PollerCommand>,
    join: JoinHandle<OrderState>,
}

impl PollerHandle {
    /// Spawns `state` onto the current Tokio runtime using the system DNS
    /// resolver, and returns a handle to it immediately; the poller
    /// begins running in `Starting`.
    pub fn spawn(state: OrderState, config: PollerConfig) -> Self {
        Self::spawn_with_resolver(state, config, Arc::new(DnsResolver::system()))
    }

    /// As [`Self::spawn`], but with an explicit DNS propagation checker —
    /// tests substitute one that doesn't depend on real DNS.
    pub fn spawn_with_resolver(state: OrderState, config: PollerConfig, resolver: Arc<dyn DnsCheck>) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let join = tokio::spawn(machine::run(state, config, resolver, rx));
        Self { commands: tx, join }
    }

    /// Requests cancellation. The poller settles into `cancelled` at its
    /// next suspension point; this does not wait for that to happen.
    pub async fn cancel(&self) {
        let _ = self.commands.send(PollerCommand::Cancel).await;
    }

    /// Asks the running poller for its current state. Returns `None` if
    /// the task has already finished (use [`Self::join`] instead).
    pub async fn introspect(&self) -> Option<PollerState> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(PollerCommand::Introspect(tx)).await.ok()?;
        rx.await.ok()
    }

    /// Waits for the poller to reach a terminal state and returns its
    /// final working set.
    pub async fn join(self) -> Result<OrderState, tokio::task::JoinError> {
        self.join.await
    }
}
