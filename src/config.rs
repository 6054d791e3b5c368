//! Explicit configuration records, replacing the source's keyword-argument
//! option bags (`spec.md` §9). Coercion rules (scalar→sequence,
//! string→`{type,value}`) live in [`normalize`].

use std::time::Duration;

use serde_json::Value;

use crate::wire::identifier::AcmeIdentifier;

#[derive(Debug, Clone, Default)]
pub struct NewAccountConfig {
    pub contact: Vec<String>,
    pub terms_of_service_agreed: bool,
    pub only_return_existing: bool,
    pub external_account_binding: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct NewOrderConfig {
    pub identifiers: Vec<AcmeIdentifier>,
    pub not_before: Option<chrono::DateTime<chrono::FixedOffset>>,
    pub not_after: Option<chrono::DateTime<chrono::FixedOffset>>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub scale_ms: u64,
    pub limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            scale_ms: 1000,
            limit: 10,
        }
    }
}

/// Exponential backoff parameters for a single retry loop (`spec.md` §4.9
/// "Polling schedule"): `base * multiplier^attempt`, capped, with `±jitter`
/// applied multiplicatively.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub multiplier_min: f64,
    pub multiplier_max: f64,
    pub cap: Duration,
    pub jitter: f64,
}

impl BackoffConfig {
    pub const SERVER_POLL: Self = Self {
        base: Duration::from_secs(2),
        multiplier_min: 1.5,
        multiplier_max: 2.0,
        cap: Duration::from_secs(60),
        jitter: 0.20,
    };

    pub const DNS_PROPAGATION: Self = Self {
        base: Duration::from_secs(1),
        multiplier_min: 1.5,
        multiplier_max: 2.0,
        cap: Duration::from_secs(60),
        jitter: 0.20,
    };
}

/// Per-state time budgets and backoff policy for the order poller.
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub dns_propagation_backoff: BackoffConfig,
    pub server_poll_backoff: BackoffConfig,
    pub authorization_budget: Duration,
    pub finalization_budget: Duration,
    pub download_budget: Duration,
    pub request_timeout: Duration,
    pub max_bad_nonce_retries: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            dns_propagation_backoff: BackoffConfig::DNS_PROPAGATION,
            server_poll_backoff: BackoffConfig::SERVER_POLL,
            authorization_budget: Duration::from_secs(10 * 60),
            finalization_budget: Duration::from_secs(2 * 60),
            download_budget: Duration::from_secs(2 * 60),
            request_timeout: Duration::from_secs(30),
            max_bad_nonce_retries: 5,
        }
    }
}

/// Boundary normalizers for the loose "keyword-style" inputs the ACME
/// operations accept (`spec.md` §4.5 / §4.6).
pub mod normalize {
    use super::AcmeIdentifier;

    /// A contact may be supplied as one string or a list of strings; the
    /// wire form is always a list.
    pub enum ContactInput {
        One(String),
        Many(Vec<String>),
    }

    pub fn contacts(input: ContactInput) -> Vec<String> {
        match input {
            ContactInput::One(s) => vec![s],
            ContactInput::Many(v) => v,
        }
    }

    /// An identifier set may be supplied as a single domain string, a
    /// single `{type, value}` pair, or a sequence of either.
    pub enum IdentifiersInput {
        Domain(String),
        Identifier(AcmeIdentifier),
        Many(Vec<IdentifierInput>),
    }

    pub enum IdentifierInput {
        Domain(String),
        Identifier(AcmeIdentifier),
    }

    pub fn identifiers(input: IdentifiersInput) -> Vec<AcmeIdentifier> {
        match input {
            IdentifiersInput::Domain(name) => vec![AcmeIdentifier::dns(name)],
            IdentifiersInput::Identifier(ident) => vec![ident],
            IdentifiersInput::Many(items) => items
                .into_iter()
                .map(|item| match item {
                    IdentifierInput::Domain(name) => AcmeIdentifier::dns(name),
                    IdentifierInput::Identifier(ident) => ident,
                })
                .collect(),
        }
    }
}
