//! Signed HTTP transport (C3): POST-as-GET and POST with a signed payload,
//! nonce refresh, and bounded bad-nonce retry.

use http_client::{Body, Request, Response};
use serde::Serialize;
use serde_json::value::RawValue;

use crate::crypto::jws::{jws_flattened, Jws, JwsHeader};
use crate::error::{AcmeError, AcmeResult};
use crate::session::Session;
use crate::wire::problem::{AcmeProblem, AcmeProblemType};

/// `spec.md` §9: "the source retries [badNonce] without bound... this
/// spec bounds retries to prevent livelock against a misbehaving server."
pub const MAX_BAD_NONCE_RETRIES: u32 = 5;

pub enum AuthMode<'a> {
    /// Sign with the account KID — every operation except `newAccount`.
    Kid(&'a str),
    /// Embed the public JWK instead of a KID — `newAccount` only.
    Jwk,
}

/// `post(session, url, empty)`: a signed, authenticated read.
pub async fn post_as_get(session: &Session, url: &str, auth: AuthMode<'_>) -> AcmeResult<Response> {
    post(session, url, None, auth).await
}

/// `post(session, url, "{}")`: nudge the server to (re)validate a resource.
pub async fn poke(session: &Session, url: &str, auth: AuthMode<'_>) -> AcmeResult<Response> {
    post(session, url, Some(serde_json::json!({})), auth).await
}

/// Signs and POSTs `payload` (or an empty payload for POST-as-GET) to
/// `url`, implementing the algorithm in `spec.md` §4.3.
pub async fn post(
    session: &Session,
    url: &str,
    payload: Option<impl Serialize>,
    auth: AuthMode<'_>,
) -> AcmeResult<Response> {
    let payload_bytes = match payload {
        Some(p) => serde_json::to_vec(&p)?,
        None => Vec::new(),
    };

    session
        .rate_limit_gate()
        .admit(session.rate_limit_key())
        .map_err(|_| AcmeError::Throttled(session.rate_limit_key().id))?;

    let mut attempt = 0;
    loop {
        let resp = post_once(session, url, &payload_bytes, &auth).await;
        match resp {
            Err(AcmeError::AcmeProblem(ref problem))
                if problem.has_type(AcmeProblemType::BadNonce) && attempt < MAX_BAD_NONCE_RETRIES =>
            {
                attempt += 1;
                tracing::debug!(url, attempt, "retrying after badNonce");
                continue;
            }
            other => return other,
        }
    }
}

async fn post_once(
    session: &Session,
    url: &str,
    payload_bytes: &[u8],
    auth: &AuthMode<'_>,
) -> AcmeResult<Response> {
    let nonce = ensure_nonce(session).await?;
    let public_jwk;
    let (kid, jwk) = match auth {
        AuthMode::Kid(kid) => (Some(*kid), None),
        AuthMode::Jwk => {
            public_jwk = RawValue::from_string(
                session
                    .account_key()
                    .public_jwk()
                    .map_err(AcmeError::CryptoError)?,
            )?;
            (None, Some(&public_jwk))
        }
    };

    let header = JwsHeader {
        alg: session.account_key().jws_alg(),
        url,
        nonce: &nonce,
        kid,
        jwk,
    };
    let jws = jws_flattened(session.account_key(), &header, payload_bytes)
        .map_err(AcmeError::CryptoError)?;

    let mut req = Request::post(url);
    req.set_body(Body::from(&jws));

    tracing::debug!(url, serial = session.next_request_serial(), "acme POST");

    let resp = session.http().send(req).await;
    let mut resp = match resp {
        Ok(resp) => resp,
        Err(err) => return Err(AcmeError::from(err)),
    };

    if let Some(values) = resp.header("Replay-Nonce") {
        session.set_nonce(values.last().as_str().to_owned());
    }

    check_response_error(&mut resp).await?;
    Ok(resp)
}

async fn ensure_nonce(session: &Session) -> AcmeResult<String> {
    if let Some(nonce) = session.take_nonce() {
        return Ok(nonce);
    }
    session.new_nonce().await?;
    session
        .take_nonce()
        .ok_or(AcmeError::MissingExpectedHeader("Replay-Nonce"))
}

async fn check_response_error(resp: &mut Response) -> AcmeResult<()> {
    let status = resp.status();
    if status.is_success() || status.is_informational() {
        return Ok(());
    }
    if resp
        .content_type()
        .map(|ct| ct.essence() == AcmeProblem::CONTENT_TYPE)
        .unwrap_or(false)
    {
        if let Ok(problem) = resp.body_json::<AcmeProblem>().await {
            if problem.has_type(AcmeProblemType::RateLimited) {
                return Err(AcmeError::RateLimited {
                    retry_after: retry_after(resp),
                    problem,
                });
            }
            return Err(AcmeError::AcmeProblem(problem));
        }
    }
    Err(AcmeError::from(http_client::Error::from_str(status, "")))
}

/// Parses `Retry-After` as either delta-seconds or an HTTP-date
/// (`spec.md` §4.9).
fn retry_after(resp: &Response) -> Option<std::time::Duration> {
    let value = resp.header("Retry-After")?.last().as_str();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(std::time::Duration::from_secs(secs));
    }
    let when = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let now = chrono::Utc::now();
    let delta = when.with_timezone(&chrono::Utc) - now;
    delta.to_std().ok()
}

impl From<&Jws> for Body {
    fn from(jws: &Jws) -> Self {
        let mut body = Body::from_json(jws).unwrap();
        body.set_mime(crate::crypto::jws::CONTENT_TYPE);
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{account_key::GenerateAccountKey, es256::Es256AccountKey};
    use crate::mock::{MockHttpClient, ScriptedResponse};
    use crate::ratelimit::{RateLimitGate, RateLimitKey};
    use std::sync::Arc;

    fn directory_body() -> serde_json::Value {
        serde_json::json!({
            "newNonce": "https://example.test/acme/new-nonce",
            "newAccount": "https://example.test/acme/new-account",
            "newOrder": "https://example.test/acme/new-order",
            "revokeCert": "https://example.test/acme/revoke-cert",
            "keyChange": "https://example.test/acme/key-change",
            "meta": {}
        })
    }

    #[tokio::test]
    async fn nonce_monotonicity_across_requests() {
        let mock = MockHttpClient::new(vec![
            ScriptedResponse::json(200, directory_body()).with_nonce("nonce-0"),
            ScriptedResponse::json(200, serde_json::json!({"ok": true})).with_nonce("nonce-1"),
            ScriptedResponse::json(200, serde_json::json!({"ok": true})).with_nonce("nonce-2"),
        ]);
        let key = Es256AccountKey::generate();
        let session = Session::new(
            Arc::new(mock) as Arc<dyn http_client::HttpClient>,
            "https://example.test/acme/directory",
            key,
        )
        .await
        .unwrap();

        post_as_get(&session, "https://example.test/acme/order/1", AuthMode::Kid("kid"))
            .await
            .unwrap();
        assert_eq!(session.take_nonce().as_deref(), Some("nonce-1"));
        session.set_nonce("nonce-1".into());

        post_as_get(&session, "https://example.test/acme/order/1", AuthMode::Kid("kid"))
            .await
            .unwrap();
        assert_eq!(session.take_nonce().as_deref(), Some("nonce-2"));
    }

    #[tokio::test]
    async fn bad_nonce_is_retried_exactly_once() {
        let mock = MockHttpClient::new(vec![
            ScriptedResponse::json(200, directory_body()).with_nonce("nonce-0"),
            ScriptedResponse::problem(400, "urn:ietf:params:acme:error:badNonce", "stale nonce")
                .with_nonce("nonce-1"),
            ScriptedResponse::json(200, serde_json::json!({"ok": true})).with_nonce("nonce-2"),
        ]);
        let key = Es256AccountKey::generate();
        let session = Session::new(
            Arc::new(mock) as Arc<dyn http_client::HttpClient>,
            "https://example.test/acme/directory",
            key,
        )
        .await
        .unwrap();

        post_as_get(&session, "https://example.test/acme/order/1", AuthMode::Kid("kid"))
            .await
            .unwrap();
        assert_eq!(session.take_nonce().as_deref(), Some("nonce-2"));
    }

    #[tokio::test]
    async fn throttled_when_session_bucket_exhausted() {
        let mock = MockHttpClient::new(vec![ScriptedResponse::json(200, directory_body())
            .with_nonce("nonce-0")]);
        let key = Es256AccountKey::generate();
        let gate = Arc::new(RateLimitGate::new());
        let rl_key = RateLimitKey::new("http-test", 1000, 1);
        let session = Session::with_rate_limit(
            Arc::new(mock) as Arc<dyn http_client::HttpClient>,
            "https://example.test/acme/directory",
            key,
            gate,
            rl_key,
        )
        .await
        .unwrap();
        session.set_nonce("seed".into());

        session
            .rate_limit_gate()
            .admit(rl_key)
            .expect("first admission should succeed");

        let err = post_as_get(&session, "https://example.test/acme/order/1", AuthMode::Kid("kid"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Throttled);
    }
}
