//! The order poller's run loop (C9): drives `OrderState` through the
//! state diagram in `spec.md` §4.9, suspending at every network call and
//! scheduled poll per §5.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::{NewOrderConfig, PollerConfig};
use crate::dns::{dns_challenge_name, DnsCheck};
use crate::error::AcmeError;
use crate::order::{self, EnrichedChallenge};
use crate::wire::challenge::{CHALLENGE_TYPE_DNS_01, CHALLENGE_TYPE_HTTP_01};
use crate::wire::challenge::{ChallengeResource, ChallengeStatus};
use crate::wire::order::OrderStatus;

use super::backoff::Backoff;
use super::callbacks::{ChallengeResponseRecord, FinalizationDecision, StartArgs};
use super::handle::PollerCommand;
use super::state::{OrderState, PollerState};

/// What a single state handler decided should happen next.
enum StepOutcome {
    Advance(PollerState),
    RetryAfter(Duration),
    Fail(AcmeError),
    InvalidOrder(AcmeError),
}

/// Runs `state` to a terminal state, honoring `commands` at every
/// suspension point. Returns the final `OrderState` for introspection.
pub async fn run(
    mut state: OrderState,
    config: PollerConfig,
    resolver: Arc<dyn DnsCheck>,
    mut commands: mpsc::Receiver<PollerCommand>,
) -> OrderState {
    let mut server_backoff = Backoff::new(config.server_poll_backoff);
    let mut dns_backoff = Backoff::new(config.dns_propagation_backoff);

    loop {
        if drain_cancel(&mut commands, &mut state) {
            return state;
        }
        if state.state.is_terminal() {
            return state;
        }

        if let Some(err) = check_budget(&state) {
            state.fail(err);
            continue;
        }

        let outcome = match state.state {
            PollerState::Starting => do_starting(&mut state).await,
            PollerState::CreatingOrder => do_creating_order(&mut state, &mut server_backoff).await,
            PollerState::FetchingAuthorizations => do_fetching_authorizations(&mut state, &config, &mut server_backoff).await,
            PollerState::PublishingChallenges => do_publishing_challenges(&mut state).await,
            PollerState::AwaitingDnsPropagation => do_awaiting_dns_propagation(&mut state, resolver.as_ref(), &mut dns_backoff).await,
            PollerState::PokingChallenges => do_poking_challenges(&mut state, &mut server_backoff).await,
            PollerState::PollingAuthorizations => do_polling_authorizations(&mut state, &mut server_backoff).await,
            PollerState::Ready => do_ready(&mut state, &config).await,
            PollerState::Finalizing => do_finalizing(&mut state, &mut server_backoff).await,
            PollerState::PollingOrder => do_polling_order(&mut state, &mut server_backoff, &config).await,
            PollerState::Downloading => do_downloading(&mut state, &mut server_backoff).await,
            PollerState::Done | PollerState::Failed | PollerState::Cancelled => {
                unreachable!("terminal states are returned above")
            }
        };

        match outcome {
            StepOutcome::Advance(next) => {
                server_backoff.reset();
                state.transition(next);
            }
            StepOutcome::RetryAfter(delay) => {
                if wait_or_cancel(delay, &mut commands, &mut state).await {
                    return state;
                }
            }
            StepOutcome::Fail(err) => state.fail(err),
            StepOutcome::InvalidOrder(err) => {
                let _ = state.callbacks.invalid_order(state.order.as_ref(), &err).await;
                state.fail(err);
            }
        }
    }
}

/// Drains any pending commands without blocking. Returns `true` if the
/// poller was cancelled (the caller should stop driving it).
fn drain_cancel(commands: &mut mpsc::Receiver<PollerCommand>, state: &mut OrderState) -> bool {
    while let Ok(cmd) = commands.try_recv() {
        match cmd {
            PollerCommand::Cancel => {
                state.transition(PollerState::Cancelled);
                return true;
            }
            PollerCommand::Introspect(reply) => {
                let _ = reply.send(state.state);
            }
        }
    }
    false
}

/// Sleeps for `delay`, but wakes early on a command. Returns `true` if
/// cancellation was observed.
async fn wait_or_cancel(delay: Duration, commands: &mut mpsc::Receiver<PollerCommand>, state: &mut OrderState) -> bool {
    let deadline = tokio::time::sleep(delay);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return false,
            cmd = commands.recv() => {
                match cmd {
                    Some(PollerCommand::Cancel) => {
                        state.transition(PollerState::Cancelled);
                        return true;
                    }
                    Some(PollerCommand::Introspect(reply)) => {
                        let _ = reply.send(state.state);
                    }
                    None => return false,
                }
            }
        }
    }
}

/// Per-phase budget check (`spec.md` §4.9 "Polling schedule"). The
/// authorization-convergence phase covers `fetching_authorizations`
/// through `polling_authorizations`; finalization covers `finalizing`
/// and `polling_order`; download covers `downloading` alone.
fn check_budget(state: &OrderState) -> Option<AcmeError> {
    let deadline = state.phase_deadline?;
    if Instant::now() > deadline {
        Some(AcmeError::Timeout(Duration::from_secs(0)))
    } else {
        None
    }
}

fn retry_delay(err: &AcmeError, backoff: &mut Backoff) -> Duration {
    if let AcmeError::RateLimited {
        retry_after: Some(delay),
        ..
    } = err
    {
        return *delay;
    }
    let mut rng = rand::thread_rng();
    backoff.next_delay(&mut rng)
}

fn outcome_for_error(err: AcmeError, backoff: &mut Backoff) -> StepOutcome {
    if err.is_retryable() {
        StepOutcome::RetryAfter(retry_delay(&err, backoff))
    } else {
        StepOutcome::Fail(err)
    }
}

async fn do_starting(state: &mut OrderState) -> StepOutcome {
    let args = StartArgs {
        identifiers: state.identifiers.clone(),
    };
    match state.callbacks.init(args).await {
        Ok(augmented) => {
            state.identifiers = augmented.identifiers;
            StepOutcome::Advance(PollerState::CreatingOrder)
        }
        Err(err) => StepOutcome::RetryAfter(Duration::from_secs(2)).tap_err(err),
    }
}

/// Small helper so a callback error can be logged without abandoning the
/// simple `StepOutcome` return above.
impl StepOutcome {
    fn tap_err(self, err: super::callbacks::CallbackError) -> Self {
        tracing::warn!(error = %err, "callback failed, retrying");
        self
    }
}

async fn do_creating_order(state: &mut OrderState, backoff: &mut Backoff) -> StepOutcome {
    let config = NewOrderConfig {
        identifiers: state.identifiers.clone(),
        ..Default::default()
    };
    match order::new_order(&state.session, &config).await {
        Ok(created) => {
            state.order_url = created.location.clone();
            state.order = Some(created);
            StepOutcome::Advance(PollerState::FetchingAuthorizations)
        }
        Err(err) => outcome_for_error(err, backoff),
    }
}

async fn do_fetching_authorizations(state: &mut OrderState, config: &PollerConfig, backoff: &mut Backoff) -> StepOutcome {
    let urls = match &state.order {
        Some(order) => order.authorizations.clone(),
        None => return StepOutcome::Fail(AcmeError::InvalidState("no order".into())),
    };
    match order::create_challenge_responses(&state.session, &urls).await {
        Ok(plan) => {
            state.challenge_plan = plan;
            state.phase_deadline = Some(Instant::now() + config.authorization_budget);
            StepOutcome::Advance(PollerState::PublishingChallenges)
        }
        Err(err) => outcome_for_error(err, backoff),
    }
}

/// `spec.md` §4.9 "prefer dns-01, else http-01; ignore others".
fn select_challenge(challenges: &[EnrichedChallenge]) -> Option<&EnrichedChallenge> {
    challenges
        .iter()
        .find(|c| c.challenge.type_ == CHALLENGE_TYPE_DNS_01 && c.response.is_some())
        .or_else(|| {
            challenges
                .iter()
                .find(|c| c.challenge.type_ == CHALLENGE_TYPE_HTTP_01 && c.response.is_some())
        })
}

async fn do_publishing_challenges(state: &mut OrderState) -> StepOutcome {
    let mut records = Vec::new();
    for enriched in &state.challenge_plan {
        let Some(chosen) = select_challenge(&enriched.challenges) else {
            continue;
        };
        state.selected.insert(enriched.url.clone(), chosen.clone());
        let identifier = enriched.authorization.identifier.clone();
        let dns_name = (chosen.challenge.type_ == CHALLENGE_TYPE_DNS_01)
            .then(|| dns_challenge_name(&identifier.value));
        records.push(ChallengeResponseRecord {
            identifier,
            challenge_type: chosen.challenge.type_.clone(),
            dns_name,
            token: chosen.challenge.token.clone().unwrap_or_default(),
            response: chosen.response.clone().unwrap_or_default(),
        });
    }

    if let Err(err) = state.callbacks.publish_challenge_responses(&records).await {
        tracing::warn!(error = %err, "publish_challenge_responses failed, retrying");
        return StepOutcome::RetryAfter(Duration::from_secs(2));
    }

    let has_dns01 = state
        .selected
        .values()
        .any(|c| c.challenge.type_ == CHALLENGE_TYPE_DNS_01);
    if has_dns01 {
        StepOutcome::Advance(PollerState::AwaitingDnsPropagation)
    } else {
        StepOutcome::Advance(PollerState::PokingChallenges)
    }
}

async fn do_awaiting_dns_propagation(state: &mut OrderState, resolver: &dyn DnsCheck, backoff: &mut Backoff) -> StepOutcome {
    for enriched in &state.challenge_plan {
        let Some(chosen) = state.selected.get(&enriched.url) else {
            continue;
        };
        if chosen.challenge.type_ != CHALLENGE_TYPE_DNS_01 {
            continue;
        }
        let name = dns_challenge_name(&enriched.authorization.identifier.value);
        let Some(response) = &chosen.response else {
            continue;
        };
        if !resolver.txt_contains(&name, response).await {
            let mut rng = rand::thread_rng();
            return StepOutcome::RetryAfter(backoff.next_delay(&mut rng));
        }
    }
    StepOutcome::Advance(PollerState::PokingChallenges)
}

async fn do_poking_challenges(state: &mut OrderState, backoff: &mut Backoff) -> StepOutcome {
    let urls: Vec<String> = state.selected.keys().cloned().collect();
    for authz_url in urls {
        let Some(chosen) = state.selected.get(&authz_url) else {
            continue;
        };
        if matches!(chosen.challenge.status, ChallengeStatus::Valid | ChallengeStatus::Processing) {
            continue;
        }
        let challenge_url = chosen.challenge.url.clone();
        match order::poke_challenge(&state.session, &challenge_url).await {
            Ok(updated) => {
                update_selected_challenge(state, &authz_url, updated);
            }
            Err(err) => return outcome_for_error(err, backoff),
        }
    }
    StepOutcome::Advance(PollerState::PollingAuthorizations)
}

fn update_selected_challenge(state: &mut OrderState, authz_url: &str, updated: ChallengeResource) {
    if let Some(entry) = state.selected.get_mut(authz_url) {
        entry.challenge = updated;
    }
}

async fn do_polling_authorizations(state: &mut OrderState, backoff: &mut Backoff) -> StepOutcome {
    let urls: Vec<String> = state.challenge_plan.iter().map(|e| e.url.clone()).collect();
    let mut all_valid = true;
    for url in urls {
        let authorization = match order::get_authorization(&state.session, &url).await {
            Ok(a) => a,
            Err(err) => return outcome_for_error(err, backoff),
        };
        match authorization.status {
            crate::wire::authorization::AuthorizationStatus::Valid => {
                state.authorizations.insert(url, authorization);
            }
            crate::wire::authorization::AuthorizationStatus::Invalid => {
                let problem = authorization
                    .challenges
                    .iter()
                    .find_map(|c| c.error.clone())
                    .unwrap_or_default();
                return StepOutcome::InvalidOrder(AcmeError::AuthorizationInvalid(problem));
            }
            _ => {
                all_valid = false;
                state.authorizations.insert(url, authorization);
            }
        }
    }

    if all_valid {
        StepOutcome::Advance(PollerState::Ready)
    } else {
        let mut rng = rand::thread_rng();
        StepOutcome::RetryAfter(backoff.next_delay(&mut rng))
    }
}

async fn do_ready(state: &mut OrderState, config: &PollerConfig) -> StepOutcome {
    state.phase_deadline = Some(Instant::now() + config.finalization_budget);
    StepOutcome::Advance(PollerState::Finalizing)
}

async fn do_finalizing(state: &mut OrderState, backoff: &mut Backoff) -> StepOutcome {
    let Some(order) = &state.order else {
        return StepOutcome::Fail(AcmeError::InvalidState("no order".into()));
    };
    let Some(finalize_url) = order.finalize.clone() else {
        return StepOutcome::Fail(AcmeError::MissingExpectedField("finalize"));
    };

    let csr = match state.callbacks.get_csr(&state.identifiers).await {
        Ok(csr) => csr,
        Err(err) => {
            tracing::warn!(error = %err, "get_csr failed, retrying");
            return StepOutcome::RetryAfter(Duration::from_secs(2));
        }
    };

    match order::finalize_order(&state.session, &finalize_url, &csr).await {
        Ok(updated) => {
            let order_url = state.order_url.clone();
            state.order = Some(updated);
            state.order_url = order_url;
            StepOutcome::Advance(PollerState::PollingOrder)
        }
        Err(err) => {
            let order_ref = state.order.as_ref().expect("checked above");
            match state.callbacks.handle_finalization_error(order_ref, &err).await {
                FinalizationDecision::Retry => {
                    let mut rng = rand::thread_rng();
                    StepOutcome::RetryAfter(backoff.next_delay(&mut rng))
                }
                FinalizationDecision::Abort => StepOutcome::Fail(err),
            }
        }
    }
}

async fn do_polling_order(state: &mut OrderState, backoff: &mut Backoff, config: &PollerConfig) -> StepOutcome {
    let Some(order_url) = state.order_url.clone() else {
        return StepOutcome::Fail(AcmeError::InvalidState("no order url".into()));
    };
    match order::poll_order(&state.session, &order_url).await {
        Ok(updated) => match updated.status {
            OrderStatus::Valid => {
                state.order = Some(updated);
                state.phase_deadline = Some(Instant::now() + config.download_budget);
                StepOutcome::Advance(PollerState::Downloading)
            }
            OrderStatus::Invalid => {
                let problem = updated.error.clone().unwrap_or_default();
                state.order = Some(updated);
                StepOutcome::InvalidOrder(AcmeError::AuthorizationInvalid(problem))
            }
            _ => {
                state.order = Some(updated);
                let mut rng = rand::thread_rng();
                StepOutcome::RetryAfter(backoff.next_delay(&mut rng))
            }
        },
        Err(err) => outcome_for_error(err, backoff),
    }
}

async fn do_downloading(state: &mut OrderState, backoff: &mut Backoff) -> StepOutcome {
    let Some(cert_url) = state.order.as_ref().and_then(|o| o.certificate.clone()) else {
        return StepOutcome::Fail(AcmeError::MissingExpectedField("certificate"));
    };
    let pem_chain = match order::download_certificate(&state.session, &cert_url).await {
        Ok(body) => body,
        Err(err) => return outcome_for_error(err, backoff),
    };

    let order = state.order.as_ref().expect("checked above");
    if let Err(err) = state.callbacks.process_certificate(order, &pem_chain).await {
        tracing::warn!(error = %err, "process_certificate failed, retrying");
        return StepOutcome::RetryAfter(Duration::from_secs(2));
    }
    if let Err(err) = state.callbacks.ack_order(order).await {
        tracing::warn!(error = %err, "ack_order failed, retrying");
        return StepOutcome::RetryAfter(Duration::from_secs(2));
    }
    StepOutcome::Advance(PollerState::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{account_key::GenerateAccountKey, es256::Es256AccountKey};
    use crate::mock::{MockHttpClient, ScriptedResponse};
    use crate::poller::callbacks::CallbackResult;
    use crate::session::Session;
    use crate::wire::identifier::AcmeIdentifier;
    use crate::wire::order::OrderResource;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

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

    #[derive(Default)]
    struct RecordingCallbacks {
        published: Mutex<Vec<Vec<ChallengeResponseRecord>>>,
        certificates: Mutex<Vec<String>>,
        acked: Mutex<bool>,
        invalid: Mutex<bool>,
    }

    #[async_trait]
    impl super::super::callbacks::OrderCallbacks for RecordingCallbacks {
        async fn publish_challenge_responses(&self, responses: &[ChallengeResponseRecord]) -> CallbackResult<()> {
            self.published.lock().unwrap().push(responses.to_vec());
            Ok(())
        }

        async fn get_csr(&self, _identifiers: &[AcmeIdentifier]) -> CallbackResult<Vec<u8>> {
            Ok(vec![1, 2, 3])
        }

        async fn process_certificate(&self, _order: &OrderResource, pem_chain: &str) -> CallbackResult<()> {
            self.certificates.lock().unwrap().push(pem_chain.to_string());
            Ok(())
        }

        async fn ack_order(&self, _order: &OrderResource) -> CallbackResult<()> {
            *self.acked.lock().unwrap() = true;
            Ok(())
        }

        async fn invalid_order(&self, _order: Option<&OrderResource>, _err: &AcmeError) -> CallbackResult<()> {
            *self.invalid.lock().unwrap() = true;
            Ok(())
        }

        async fn handle_finalization_error(&self, _order: &OrderResource, _err: &AcmeError) -> FinalizationDecision {
            FinalizationDecision::Abort
        }
    }

    #[tokio::test]
    async fn happy_path_single_identifier_reaches_done() {
        let mock = MockHttpClient::new(vec![
            ScriptedResponse::json(200, directory_body()).with_nonce("n0"),
            // newOrder
            ScriptedResponse::json(
                201,
                serde_json::json!({
                    "status": "pending",
                    "identifiers": [{"type": "dns", "value": "foo.example.com"}],
                    "authorizations": ["https://example.test/acme/authz/1"],
                    "finalize": "https://example.test/acme/order/1/finalize"
                }),
            )
            .with_nonce("n1")
            .with_header("Location", "https://example.test/acme/order/1"),
            // GET authz/1
            ScriptedResponse::json(
                200,
                serde_json::json!({
                    "identifier": {"type": "dns", "value": "foo.example.com"},
                    "status": "pending",
                    "challenges": [{
                        "type": "dns-01",
                        "url": "https://example.test/acme/chall/1",
                        "status": "pending",
                        "token": "tok"
                    }]
                }),
            )
            .with_nonce("n2"),
        ]);
        let key = Es256AccountKey::generate();
        let session = Session::new(
            Arc::new(mock) as Arc<dyn http_client::HttpClient>,
            "https://example.test/acme/directory",
            key,
        )
        .await
        .unwrap();
        session.set_account_kid("https://example.test/acme/acct/1".to_string());

        let callbacks = Arc::new(RecordingCallbacks::default());
        let identifiers = vec![AcmeIdentifier::dns("foo.example.com")];
        let mut state = OrderState::new(session, identifiers, callbacks.clone());

        // Drive only as far as the scripted responses allow: starting,
        // creating_order, fetching_authorizations. A full run to `done`
        // belongs to the end-to-end integration tests, which script the
        // remaining DNS/poke/poll/finalize/download legs.
        let (_tx, rx) = mpsc::channel(1);
        let config = PollerConfig::default();
        let mut backoff = Backoff::new(config.server_poll_backoff);

        let outcome = do_starting(&mut state).await;
        assert!(matches!(outcome, StepOutcome::Advance(PollerState::CreatingOrder)));
        state.transition(PollerState::CreatingOrder);

        let outcome = do_creating_order(&mut state, &mut backoff).await;
        assert!(matches!(outcome, StepOutcome::Advance(PollerState::FetchingAuthorizations)));
        state.transition(PollerState::FetchingAuthorizations);
        assert_eq!(
            state.order_url.as_deref(),
            Some("https://example.test/acme/order/1")
        );

        let outcome = do_fetching_authorizations(&mut state, &config, &mut backoff).await;
        assert!(matches!(outcome, StepOutcome::Advance(PollerState::PublishingChallenges)));
        assert_eq!(state.challenge_plan.len(), 1);
        assert_eq!(state.challenge_plan[0].challenges.len(), 1);
        drop(rx);
    }

    #[test]
    fn select_challenge_prefers_dns01_over_http01() {
        let make = |type_: &str| EnrichedChallenge {
            challenge: ChallengeResource {
                type_: type_.to_string(),
                url: format!("https://example.test/{type_}"),
                status: ChallengeStatus::Pending,
                validated: None,
                error: None,
                token: Some("tok".into()),
                additional_fields: Default::default(),
            },
            response: Some("resp".into()),
        };
        let challenges = vec![make(CHALLENGE_TYPE_HTTP_01), make(CHALLENGE_TYPE_DNS_01)];
        let chosen = select_challenge(&challenges).unwrap();
        assert_eq!(chosen.challenge.type_, CHALLENGE_TYPE_DNS_01);
    }
}
