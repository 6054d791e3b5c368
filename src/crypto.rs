pub mod account_key;
pub mod es256;
pub mod jws;
pub mod thumbprint;

use account_key::{AccountKey, GenerateAccountKey};
use es256::Es256AccountKey;

use crate::{AcmeError, AcmeResult};

pub use thumbprint::thumbprint;

/// Generates a fresh ES256 (P-256) account key. RFC 8555 requires ACME
/// servers to support this algorithm, so it's the only one this crate
/// generates; `account_key_from_jwk` still accepts whatever key a caller
/// already has on file.
pub fn generate_account_key() -> impl AccountKey {
    Es256AccountKey::generate()
}

pub fn account_key_from_jwk(jwk: impl AsRef<str>) -> AcmeResult<Box<dyn AccountKey>> {
    let jwk = jwk.as_ref();
    es256::from_jwk(jwk)
        .map(|key| Box::new(key) as Box<dyn AccountKey>)
        .map_err(|_| {
            AcmeError::CryptoError(anyhow::anyhow!("couldn't decode account key from JWK"))
        })
}

pub fn sha256(bytes: impl AsRef<[u8]>) -> [u8; 32] {
    use sha2::Digest;
    let digest = sha2::Sha256::digest(bytes.as_ref());
    digest.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_key_from_jwk_es256() {
        let key = account_key_from_jwk(es256::tests::JWK).unwrap();
        assert_eq!(key.jws_alg(), "ES256");
    }

    #[test]
    fn account_key_from_jwk_invalid() {
        account_key_from_jwk("{}").unwrap_err();
    }

    #[test]
    fn sha256_known_vector() {
        // echo -n "abc" | sha256sum
        let digest = sha256(b"abc");
        assert_eq!(
            hex_encode(&digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    fn hex_encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
