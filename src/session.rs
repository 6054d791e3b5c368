//! Directory & session (C4): the ambient state of one conversation with an
//! ACME server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use http_client::{HttpClient, Request};

use crate::crypto::account_key::AccountKey;
use crate::error::{AcmeError, AcmeResult};
use crate::ratelimit::{RateLimitGate, RateLimitKey};
use crate::wire::directory::DirectoryResource;

pub static LETS_ENCRYPT_DIRECTORY_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub static LETS_ENCRYPT_STAGING_DIRECTORY_URL: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";

/// The ambient state of a live conversation with one ACME server
/// (`spec.md` §3). Not safe for concurrent signed exchanges: the nonce is a
/// linear resource, so each logical workflow (one poller) owns a `Session`
/// exclusively for the duration of a signed exchange.
pub struct Session {
    directory: DirectoryResource,
    account_key: Box<dyn AccountKey>,
    account_kid: Mutex<Option<String>>,
    nonce: Mutex<Option<String>>,
    rate_limit_gate: Arc<RateLimitGate>,
    rate_limit: RateLimitKey,
    client: Arc<dyn HttpClient>,
    request_serial: AtomicU64,
}

impl Session {
    pub async fn new(
        http: impl Into<Arc<dyn HttpClient>>,
        directory_url: impl AsRef<str>,
        account_key: impl AccountKey + 'static,
    ) -> AcmeResult<Self> {
        Self::with_rate_limit(
            http,
            directory_url,
            account_key,
            Arc::new(RateLimitGate::new()),
            RateLimitKey::DEFAULT_HTTP,
        )
        .await
    }

    pub async fn with_rate_limit(
        http: impl Into<Arc<dyn HttpClient>>,
        directory_url: impl AsRef<str>,
        account_key: impl AccountKey + 'static,
        rate_limit_gate: Arc<RateLimitGate>,
        rate_limit: RateLimitKey,
    ) -> AcmeResult<Self> {
        let client = http.into();
        let directory = fetch_directory(client.as_ref(), directory_url.as_ref()).await?;
        Ok(Self {
            directory,
            account_key: Box::new(account_key),
            account_kid: Mutex::new(None),
            nonce: Mutex::new(None),
            rate_limit_gate,
            rate_limit,
            client,
            request_serial: AtomicU64::new(0),
        })
    }

    pub fn directory(&self) -> &DirectoryResource {
        &self.directory
    }

    pub fn account_key(&self) -> &dyn AccountKey {
        self.account_key.as_ref()
    }

    pub fn account_kid(&self) -> Option<String> {
        self.account_kid.lock().unwrap().clone()
    }

    /// Sets the account KID once, after `newAccount` succeeds. Per the
    /// invariant in `spec.md` §3 this is set exactly once for the lifetime
    /// of the session.
    pub(crate) fn set_account_kid(&self, kid: String) {
        *self.account_kid.lock().unwrap() = Some(kid);
    }

    pub(crate) fn take_nonce(&self) -> Option<String> {
        self.nonce.lock().unwrap().take()
    }

    pub(crate) fn set_nonce(&self, nonce: String) {
        *self.nonce.lock().unwrap() = Some(nonce);
    }

    pub(crate) fn http(&self) -> &dyn HttpClient {
        self.client.as_ref()
    }

    pub(crate) fn rate_limit_gate(&self) -> &RateLimitGate {
        &self.rate_limit_gate
    }

    pub(crate) fn rate_limit_key(&self) -> RateLimitKey {
        self.rate_limit
    }

    /// HEAD `newNonce`, storing the returned `Replay-Nonce`. Used to seed
    /// the session's first nonce; after that the nonce is refreshed from
    /// every signed response.
    pub async fn new_nonce(&self) -> AcmeResult<()> {
        self.rate_limit_gate
            .admit(RateLimitKey::DEFAULT_NONCE)
            .map_err(|_| AcmeError::Throttled(RateLimitKey::DEFAULT_NONCE.id))?;
        let req = Request::head(self.directory.new_nonce.as_str());
        let resp = self.client.send(req).await?;
        let nonce = resp
            .header("Replay-Nonce")
            .map(|values| values.last().as_str().to_owned())
            .ok_or(AcmeError::MissingExpectedHeader("Replay-Nonce"))?;
        self.set_nonce(nonce);
        Ok(())
    }

    /// Monotonic per-session counter, useful for correlating log lines
    /// across a request's admission/sign/send/retry lifecycle.
    pub(crate) fn next_request_serial(&self) -> u64 {
        self.request_serial.fetch_add(1, Ordering::Relaxed)
    }
}

async fn fetch_directory(
    http: &dyn HttpClient,
    directory_url: &str,
) -> AcmeResult<DirectoryResource> {
    let req = Request::get(directory_url);
    let mut resp = http.send(req).await?;
    if !resp.status().is_success() {
        return Err(AcmeError::from(http_client::Error::from_str(
            resp.status(),
            "",
        )));
    }
    Ok(resp.body_json().await?)
}
