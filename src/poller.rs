//! The order poller (C9): a long-lived, per-order actor that drives an
//! ACME order from creation to an issued certificate, coordinating with
//! the caller purely through [`callbacks::OrderCallbacks`].

pub mod backoff;
pub mod callbacks;
pub mod handle;
mod machine;
pub mod state;

pub use callbacks::{CallbackError, CallbackResult, ChallengeResponseRecord, FinalizationDecision, OrderCallbacks, StartArgs};
pub use handle::{PollerCommand, PollerHandle};
pub use state::{OrderState, PollerState};
