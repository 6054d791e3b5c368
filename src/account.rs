//! Account operations (C5): `newAccount` signed in JWK-embed mode.

use crate::config::NewAccountConfig;
use crate::error::{AcmeError, AcmeResult};
use crate::session::Session;
use crate::transport::{self, AuthMode};
use crate::wire::account::{AccountResource, NewAccountResource};
use crate::wire::common::LocationResource;

/// `spec.md` §4.5: signed with the account's public JWK (no KID exists
/// yet). Stores the returned `Location` as the session's KID.
pub async fn new_account(session: &Session, config: &NewAccountConfig) -> AcmeResult<AccountResource> {
    let req = NewAccountResource {
        contact: config.contact.clone(),
        terms_of_service_agreed: config.terms_of_service_agreed,
        only_return_existing: config.only_return_existing,
        external_account_binding: config.external_account_binding.clone(),
    };
    let resp = transport::post(
        session,
        &session.directory().new_account,
        Some(&req),
        AuthMode::Jwk,
    )
    .await?;
    let resource = AccountResource::from_response(resp).await?;
    let kid = resource
        .location
        .clone()
        .ok_or(AcmeError::MissingExpectedHeader("Location"))?;
    session.set_account_kid(kid);
    Ok(resource)
}
