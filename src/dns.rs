//! DNS resolver (C7): TXT/NS lookups used to confirm dns-01 propagation
//! before asking the ACME server to validate. Grounded in the pack's use
//! of `hickory-resolver` for ACME DNS-01 plumbing.

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

/// The propagation check the poller depends on, kept as a trait (rather
/// than a concrete `DnsResolver`) so tests can substitute a resolver that
/// doesn't hit the network — the same seam `Session` uses for
/// `HttpClient`.
#[async_trait]
pub trait DnsCheck: Send + Sync {
    async fn txt_contains(&self, name: &str, value: &str) -> bool;
}

#[async_trait]
impl DnsCheck for DnsResolver {
    async fn txt_contains(&self, name: &str, value: &str) -> bool {
        DnsResolver::txt_contains(self, name, value).await
    }
}

pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    pub fn system() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }

    pub fn with_config(config: ResolverConfig, opts: ResolverOpts) -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }

    /// Looks up TXT records for `name`. On any failure (NXDOMAIN, timeout,
    /// SERVFAIL) this returns an empty sequence rather than an error —
    /// propagation checks treat "nothing there yet" and "broken DNS" the
    /// same way: keep polling.
    pub async fn lookup_txt(&self, name: &str) -> Vec<String> {
        match self.resolver.txt_lookup(name).await {
            Ok(lookup) => lookup.iter().map(|txt| txt.to_string()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub async fn lookup_ns(&self, name: &str) -> Vec<String> {
        match self.resolver.ns_lookup(name).await {
            Ok(lookup) => lookup.iter().map(|ns| ns.to_string()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Whether `value` is currently observable among `name`'s TXT records.
    pub async fn txt_contains(&self, name: &str, value: &str) -> bool {
        self.lookup_txt(name).await.iter().any(|txt| txt == value)
    }
}

/// `_acme-challenge.<domain>`, stripping a leading `*.` wildcard label.
pub fn dns_challenge_name(identifier: &str) -> String {
    let domain = identifier.strip_prefix("*.").unwrap_or(identifier);
    format!("_acme-challenge.{domain}")
}
