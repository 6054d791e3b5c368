//! Order operations (C6): `newOrder`, authorization fetch, and
//! challenge-response enrichment.

use crate::base64url;
use crate::challenge_response;
use crate::config::NewOrderConfig;
use crate::error::{AcmeError, AcmeResult};
use crate::session::Session;
use crate::transport::{self, AuthMode};
use crate::wire::authorization::AuthorizationResource;
use crate::wire::challenge::{ChallengeResource, CHALLENGE_TYPE_DNS_01, CHALLENGE_TYPE_HTTP_01};
use crate::wire::common::LocationResource;
use crate::wire::order::{FinalizeOrder, NewOrderResource, OrderResource};

/// A challenge paired with its locally-computed response (§4.8), if its
/// type is one the builder knows how to answer.
#[derive(Debug, Clone)]
pub struct EnrichedChallenge {
    pub challenge: ChallengeResource,
    pub response: Option<String>,
}

/// One authorization's challenges, enriched, keyed by its own URL.
#[derive(Debug, Clone)]
pub struct EnrichedAuthorization {
    pub url: String,
    pub authorization: AuthorizationResource,
    pub challenges: Vec<EnrichedChallenge>,
}

fn account_kid(session: &Session) -> AcmeResult<String> {
    session.account_kid().ok_or(AcmeError::NoKeyId)
}

/// `spec.md` §4.6: signed in KID mode. The returned `Location` is the
/// order URL the caller must remember; the server does not enumerate
/// outstanding orders.
pub async fn new_order(session: &Session, config: &NewOrderConfig) -> AcmeResult<OrderResource> {
    let kid = account_kid(session)?;
    let req = NewOrderResource {
        identifiers: config.identifiers.clone(),
        not_before: config.not_before,
        not_after: config.not_after,
    };
    let resp = transport::post(session, &session.directory().new_order, Some(&req), AuthMode::Kid(&kid)).await?;
    OrderResource::from_response(resp).await
}

pub async fn get_authorization(session: &Session, authorization_url: &str) -> AcmeResult<AuthorizationResource> {
    let kid = account_kid(session)?;
    let mut resp = transport::post_as_get(session, authorization_url, AuthMode::Kid(&kid)).await?;
    Ok(resp.body_json().await?)
}

/// `spec.md` §4.6 `create_challenge_responses`: POST-as-GET every
/// authorization, then compute each challenge's response (§4.8). One
/// authorization fetched at a time — a `Session`'s nonce is a linear
/// resource, so signed requests against it cannot run concurrently.
pub async fn create_challenge_responses(
    session: &Session,
    authorization_urls: &[String],
) -> AcmeResult<Vec<EnrichedAuthorization>> {
    let mut enriched = Vec::with_capacity(authorization_urls.len());
    for url in authorization_urls {
        let authorization = get_authorization(session, url).await?;
        let mut challenges = Vec::with_capacity(authorization.challenges.len());
        for challenge in &authorization.challenges {
            let response = compute_response(session, challenge)?;
            challenges.push(EnrichedChallenge {
                challenge: challenge.clone(),
                response,
            });
        }
        enriched.push(EnrichedAuthorization {
            url: url.clone(),
            authorization,
            challenges,
        });
    }
    Ok(enriched)
}

fn compute_response(session: &Session, challenge: &ChallengeResource) -> AcmeResult<Option<String>> {
    let Some(token) = challenge.token.as_deref() else {
        return Ok(None);
    };
    match challenge.type_.as_str() {
        t if t == CHALLENGE_TYPE_DNS_01 => {
            Ok(Some(challenge_response::dns01_response(token, session.account_key())?))
        }
        t if t == CHALLENGE_TYPE_HTTP_01 => {
            Ok(Some(challenge_response::http01_response(token, session.account_key())?))
        }
        _ => Ok(None),
    }
}

/// Tells the server a challenge is ready to be validated: `POST {}`.
pub async fn poke_challenge(session: &Session, challenge_url: &str) -> AcmeResult<ChallengeResource> {
    let kid = account_kid(session)?;
    let mut resp = transport::poke(session, challenge_url, AuthMode::Kid(&kid)).await?;
    Ok(resp.body_json().await?)
}

pub async fn poll_order(session: &Session, order_url: &str) -> AcmeResult<OrderResource> {
    let kid = account_kid(session)?;
    let resp = transport::post_as_get(session, order_url, AuthMode::Kid(&kid)).await?;
    OrderResource::from_response(resp).await
}

pub async fn finalize_order(
    session: &Session,
    finalize_url: &str,
    csr_der: impl AsRef<[u8]>,
) -> AcmeResult<OrderResource> {
    let kid = account_kid(session)?;
    let req = FinalizeOrder {
        csr: base64url::encode(csr_der),
    };
    let resp = transport::post(session, finalize_url, Some(&req), AuthMode::Kid(&kid)).await?;
    OrderResource::from_response(resp).await
}

pub async fn download_certificate(session: &Session, certificate_url: &str) -> AcmeResult<String> {
    let kid = account_kid(session)?;
    let mut resp = transport::post_as_get(session, certificate_url, AuthMode::Kid(&kid)).await?;
    Ok(resp.body_string().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{account_key::GenerateAccountKey, es256::Es256AccountKey};
    use crate::mock::{MockHttpClient, ScriptedResponse};
    use crate::wire::identifier::AcmeIdentifier;
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

    async fn session_with_kid(responses: Vec<ScriptedResponse>) -> Session {
        let mut all = vec![ScriptedResponse::json(200, directory_body()).with_nonce("nonce-0")];
        all.extend(responses);
        let mock = MockHttpClient::new(all);
        let key = Es256AccountKey::generate();
        let session = Session::new(
            Arc::new(mock) as Arc<dyn http_client::HttpClient>,
            "https://example.test/acme/directory",
            key,
        )
        .await
        .unwrap();
        session.set_account_kid("https://example.test/acme/acct/1".to_string());
        session
    }

    #[tokio::test]
    async fn new_order_returns_location_as_order_url() {
        let session = session_with_kid(vec![ScriptedResponse::json(
            201,
            serde_json::json!({
                "status": "pending",
                "identifiers": [{"type": "dns", "value": "foo.example.com"}],
                "authorizations": ["https://example.test/acme/authz/1"],
                "finalize": "https://example.test/acme/order/1/finalize"
            }),
        )
        .with_nonce("nonce-1")
        .with_header("Location", "https://example.test/acme/order/1")])
        .await;

        let config = NewOrderConfig {
            identifiers: vec![AcmeIdentifier::dns("foo.example.com")],
            ..Default::default()
        };
        let order = new_order(&session, &config).await.unwrap();
        assert_eq!(
            order.location.as_deref(),
            Some("https://example.test/acme/order/1")
        );
        assert_eq!(order.authorizations.len(), 1);
    }

    #[tokio::test]
    async fn dns01_challenge_gets_computed_response() {
        let session = session_with_kid(vec![ScriptedResponse::json(
            200,
            serde_json::json!({
                "identifier": {"type": "dns", "value": "foo.example.com"},
                "status": "pending",
                "challenges": [{
                    "type": "dns-01",
                    "url": "https://example.test/acme/chall/1",
                    "status": "pending",
                    "token": "DGyRejmCefe7v4NfDGDKfA"
                }]
            }),
        )
        .with_nonce("nonce-1")])
        .await;

        let enriched = create_challenge_responses(
            &session,
            &["https://example.test/acme/authz/1".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(enriched.len(), 1);
        assert_eq!(enriched[0].challenges.len(), 1);
        assert!(enriched[0].challenges[0].response.is_some());
    }
}
