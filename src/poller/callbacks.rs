//! The "publisher" collaborator contract (`spec.md` §4.9 / §6): the poller
//! never provisions DNS/HTTP records, generates a CSR, or stores a
//! certificate itself — it calls back into caller-supplied code for all of
//! that, the way the core's Non-goals require.

use async_trait::async_trait;

use crate::error::AcmeError;
use crate::wire::identifier::AcmeIdentifier;
use crate::wire::order::OrderResource;

/// Arguments to [`OrderCallbacks::init`], possibly augmented by the
/// caller before the poller proceeds (e.g. to inject extra identifiers a
/// higher layer wants bundled into the same order).
#[derive(Debug, Clone)]
pub struct StartArgs {
    pub identifiers: Vec<AcmeIdentifier>,
}

/// One provisioning instruction for the publisher: either a DNS TXT
/// record (`dns-01`) or an HTTP webroot file (`http-01`).
#[derive(Debug, Clone)]
pub struct ChallengeResponseRecord {
    pub identifier: AcmeIdentifier,
    pub challenge_type: String,
    /// For `dns-01`: `_acme-challenge.<domain>`. `None` for other types.
    pub dns_name: Option<String>,
    pub token: String,
    pub response: String,
}

/// A callback failure. Per `spec.md` §4.9, failures from any callback are
/// treated as transient (retried within the owning state's time budget)
/// unless the callback explicitly signals otherwise, which only
/// `handle_finalization_error` does via [`FinalizationDecision`].
#[derive(Debug)]
pub struct CallbackError(pub anyhow::Error);

impl std::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for CallbackError {}

impl From<anyhow::Error> for CallbackError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

pub type CallbackResult<T> = Result<T, CallbackError>;

/// The directive `handle_finalization_error` returns — `spec.md` §9's
/// open question, resolved here with an explicit return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizationDecision {
    Retry,
    Abort,
}

/// The external collaborator the poller drives. Implementations must be
/// `Send + Sync` so one handle can be shared across poller tasks (e.g. to
/// serialize DNS provider API calls behind a single implementation).
#[async_trait]
pub trait OrderCallbacks: Send + Sync {
    async fn init(&self, args: StartArgs) -> CallbackResult<StartArgs> {
        Ok(args)
    }

    /// Called once challenge responses are computed. Must be idempotent:
    /// the poller may call this again after a retry without the caller
    /// needing to detect duplicates.
    async fn publish_challenge_responses(&self, responses: &[ChallengeResponseRecord]) -> CallbackResult<()>;

    /// Called when the order enters `ready`. Returns a DER-encoded CSR.
    async fn get_csr(&self, identifiers: &[AcmeIdentifier]) -> CallbackResult<Vec<u8>>;

    /// Called once the certificate chain is downloaded (PEM, leaf first).
    async fn process_certificate(&self, order: &OrderResource, pem_chain: &str) -> CallbackResult<()>;

    /// Called after `process_certificate` succeeds; marks the order complete.
    async fn ack_order(&self, order: &OrderResource) -> CallbackResult<()>;

    /// Called when an authorization or the order itself goes `invalid`.
    /// Terminal: no further callbacks fire for this order.
    async fn invalid_order(&self, order: Option<&OrderResource>, err: &AcmeError) -> CallbackResult<()>;

    /// Called when finalization is rejected. The return value decides
    /// whether the poller retries finalization or gives up.
    async fn handle_finalization_error(&self, order: &OrderResource, err: &AcmeError) -> FinalizationDecision;
}
