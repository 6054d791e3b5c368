use thiserror::Error;

use super::wire::problem::AcmeProblem;

pub type AcmeResult<T> = Result<T, AcmeError>;

/// The error taxonomy from the design doc, independent of the concrete
/// [`AcmeError`] variant. The poller classifies on this rather than
/// matching every variant by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Throttled,
    BadNonce,
    RateLimited,
    ServerError,
    AuthorizationInvalid,
    FinalizationError,
    Timeout,
    Malformed,
    Other,
}

#[derive(Error, Debug)]
pub enum AcmeError {
    #[error("{0}")]
    AcmeProblem(AcmeProblem),

    /// A `429`/`rateLimited` response, with `Retry-After` parsed out (if
    /// present) so the poller can honor it instead of guessing with
    /// backoff (`spec.md` §4.9 "Tie-breaking & policy").
    #[error("{problem}")]
    RateLimited {
        problem: AcmeProblem,
        retry_after: Option<std::time::Duration>,
    },

    /// An authorization (or the order itself) settled into `invalid`.
    /// Terminal for the order (`spec.md` §4.9 "Failure semantics").
    #[error("authorization invalid: {0}")]
    AuthorizationInvalid(AcmeProblem),

    #[error("rate limit exceeded for bucket {0}")]
    Throttled(&'static str),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    CryptoError(anyhow::Error),

    #[error("http: [{}] {0}", .0.status())]
    HttpError(http_client::Error),

    #[error("json: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("missing expected field {0}")]
    MissingExpectedField(&'static str),

    #[error("missing expected header {0}")]
    MissingExpectedHeader(&'static str),

    #[error("account key missing key id")]
    NoKeyId,

    #[error("{0}")]
    InvalidState(String),
}

impl AcmeError {
    pub fn kind(&self) -> ErrorKind {
        use crate::wire::problem::AcmeProblemType::*;
        match self {
            AcmeError::Throttled(_) => ErrorKind::Throttled,
            AcmeError::Timeout(_) => ErrorKind::Timeout,
            AcmeError::RateLimited { .. } => ErrorKind::RateLimited,
            AcmeError::AuthorizationInvalid(_) => ErrorKind::AuthorizationInvalid,
            AcmeError::AcmeProblem(problem) => {
                if problem.has_type(BadNonce) {
                    ErrorKind::BadNonce
                } else if problem.has_type(RateLimited) {
                    ErrorKind::RateLimited
                } else if problem.has_type(ServerInternal) || problem.has_type(Connection) {
                    ErrorKind::ServerError
                } else if problem.has_type(Unauthorized) {
                    ErrorKind::Malformed
                } else {
                    ErrorKind::Malformed
                }
            }
            AcmeError::HttpError(_) => ErrorKind::ServerError,
            AcmeError::JsonError(_)
            | AcmeError::MissingExpectedField(_)
            | AcmeError::MissingExpectedHeader(_)
            | AcmeError::NoKeyId
            | AcmeError::InvalidState(_) => ErrorKind::Malformed,
            AcmeError::CryptoError(_) => ErrorKind::Other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Throttled | ErrorKind::BadNonce | ErrorKind::RateLimited | ErrorKind::ServerError
        )
    }
}

impl From<http_client::Error> for AcmeError {
    fn from(err: http_client::Error) -> Self {
        AcmeError::HttpError(err)
    }
}
