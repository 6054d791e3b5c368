use serde::Deserialize;

use crate::base64url;
use crate::crypto::account_key::AccountKey;
use crate::crypto::sha256;
use crate::{AcmeError, AcmeResult};

/// RFC 7638 canonical EC JWK: only the required members, in lexicographic
/// key order, with no whitespace. For a P-256 key that's `crv`, `kty`, `x`,
/// `y` — which happens to already be alphabetical.
#[derive(Deserialize)]
struct EcJwkMembers<'a> {
    crv: &'a str,
    kty: &'a str,
    x: &'a str,
    y: &'a str,
}

/// Computes the RFC 7638 thumbprint of an account key's public JWK:
/// base64url-unpadded SHA-256 over the canonical serialization.
pub fn thumbprint(key: &impl AccountKey) -> AcmeResult<String> {
    let public_jwk = key.public_jwk().map_err(AcmeError::CryptoError)?;
    let members: EcJwkMembers = serde_json::from_str(&public_jwk)?;
    let canonical = format!(
        r#"{{"crv":"{}","kty":"{}","x":"{}","y":"{}"}}"#,
        members.crv, members.kty, members.x, members.y
    );
    Ok(base64url::encode(sha256(canonical.as_bytes())))
}
