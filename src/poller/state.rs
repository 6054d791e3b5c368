//! The poller's state machine and its owned working set (`spec.md` §3,
//! §4.9).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AcmeError;
use crate::order::EnrichedChallenge;
use crate::session::Session;
use crate::wire::authorization::AuthorizationResource;
use crate::wire::identifier::AcmeIdentifier;
use crate::wire::order::OrderResource;

use super::callbacks::OrderCallbacks;

/// Mirrors the state diagram in `spec.md` §4.9 verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Starting,
    CreatingOrder,
    FetchingAuthorizations,
    PublishingChallenges,
    AwaitingDnsPropagation,
    PokingChallenges,
    PollingAuthorizations,
    Ready,
    Finalizing,
    PollingOrder,
    Downloading,
    Done,
    Failed,
    Cancelled,
}

impl PollerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

/// The poller's exclusively-owned working set. One `OrderState` belongs
/// to exactly one poller task for its whole lifetime (`spec.md` §3).
pub struct OrderState {
    pub session: Session,
    pub order_url: Option<String>,
    pub order: Option<OrderResource>,
    pub authorizations: HashMap<String, AuthorizationResource>,
    pub identifiers: Vec<AcmeIdentifier>,
    pub callbacks: Arc<dyn OrderCallbacks>,
    pub state: PollerState,
    pub last_error: Option<AcmeError>,

    /// Populated by `fetching_authorizations`: every authorization's
    /// challenges, each enriched with its computed response.
    pub challenge_plan: Vec<crate::order::EnrichedAuthorization>,
    /// The tie-broken challenge chosen per authorization URL (`spec.md`
    /// §4.9 "prefer dns-01, else http-01"), populated by
    /// `publishing_challenges`.
    pub selected: HashMap<String, EnrichedChallenge>,
    /// Wall-clock deadline for the phase currently in progress, derived
    /// from `PollerConfig`'s per-phase budgets.
    pub phase_deadline: Option<tokio::time::Instant>,
}

impl OrderState {
    pub fn new(session: Session, identifiers: Vec<AcmeIdentifier>, callbacks: Arc<dyn OrderCallbacks>) -> Self {
        Self {
            session,
            order_url: None,
            order: None,
            authorizations: HashMap::new(),
            identifiers,
            callbacks,
            state: PollerState::Starting,
            last_error: None,
            challenge_plan: Vec::new(),
            selected: HashMap::new(),
            phase_deadline: None,
        }
    }

    pub fn transition(&mut self, next: PollerState) {
        tracing::info!(
            order_url = self.order_url.as_deref().unwrap_or("<none>"),
            from = ?self.state,
            to = ?next,
            "poller state transition"
        );
        self.state = next;
    }

    pub fn fail(&mut self, err: AcmeError) {
        self.last_error = Some(err);
        self.transition(PollerState::Failed);
    }
}
