//! Challenge-response builder (C8): dns-01 and http-01 response derivation
//! from a challenge token and the account key's thumbprint.

use crate::base64url;
use crate::crypto::{sha256, thumbprint, account_key::AccountKey};
use crate::error::AcmeResult;

/// `token + "." + thumbprint(account_key)`, the RFC 8555 §8.1 "key
/// authorization". http-01 serves this verbatim at
/// `/.well-known/acme-challenge/<token>`; dns-01 hashes it.
pub fn key_authorization(token: &str, account_key: &impl AccountKey) -> AcmeResult<String> {
    Ok(format!("{}.{}", token, thumbprint(account_key)?))
}

/// The TXT record value placed at `_acme-challenge.<domain>`:
/// `base64url_nopad(sha256(key_authorization))`.
pub fn dns01_response(token: &str, account_key: &impl AccountKey) -> AcmeResult<String> {
    let key_auth = key_authorization(token, account_key)?;
    Ok(base64url::encode(sha256(key_auth.as_bytes())))
}

/// The raw value served at `/.well-known/acme-challenge/<token>`.
pub fn http01_response(token: &str, account_key: &impl AccountKey) -> AcmeResult<String> {
    key_authorization(token, account_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::es256;

    #[test]
    fn http01_response_is_plain_key_authorization() {
        let key = es256::from_jwk(es256::tests::JWK).unwrap();
        let response = http01_response("DGyRejmCefe7v4NfDGDKfA", &key).unwrap();
        assert!(response.starts_with("DGyRejmCefe7v4NfDGDKfA."));
    }

    #[test]
    fn dns01_response_is_hash_of_key_authorization() {
        let key = es256::from_jwk(es256::tests::JWK).unwrap();
        let key_auth = key_authorization("DGyRejmCefe7v4NfDGDKfA", &key).unwrap();
        let dns_response = dns01_response("DGyRejmCefe7v4NfDGDKfA", &key).unwrap();
        let expected = base64url::encode(sha256(key_auth.as_bytes()));
        assert_eq!(dns_response, expected);
        assert_ne!(dns_response, key_auth);
    }

    #[test]
    fn deterministic() {
        let key = es256::from_jwk(es256::tests::JWK).unwrap();
        assert_eq!(
            dns01_response("tok", &key).unwrap(),
            dns01_response("tok", &key).unwrap()
        );
    }
}
