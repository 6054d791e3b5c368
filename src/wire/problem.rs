use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// RFC 7807 problem+json document, as used by ACME error responses.
/// https://datatracker.ietf.org/doc/html/rfc8555#section-6.7
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AcmeProblem {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Subproblems, one per identifier that failed for its own reason
    /// (e.g. a `caa` rejection for one domain in a multi-SAN order).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<AcmeProblem>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AcmeProblem {
    pub const CONTENT_TYPE: &'static str = "application/problem+json";

    pub fn has_type(&self, problem_type: AcmeProblemType) -> bool {
        self.type_.as_deref() == Some(problem_type.as_str())
    }
}

impl std::fmt::Display for AcmeProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.type_.as_deref().unwrap_or("about:blank"),
            self.detail.as_deref().unwrap_or("")
        )
    }
}

/// Well-known ACME error URNs, see RFC 8555 §6.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcmeProblemType {
    BadNonce,
    RateLimited,
    Unauthorized,
    Malformed,
    ServerInternal,
    Connection,
    Dns,
    OrderNotReady,
    Caa,
}

impl AcmeProblemType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadNonce => "urn:ietf:params:acme:error:badNonce",
            Self::RateLimited => "urn:ietf:params:acme:error:rateLimited",
            Self::Unauthorized => "urn:ietf:params:acme:error:unauthorized",
            Self::Malformed => "urn:ietf:params:acme:error:malformed",
            Self::ServerInternal => "urn:ietf:params:acme:error:serverInternal",
            Self::Connection => "urn:ietf:params:acme:error:connection",
            Self::Dns => "urn:ietf:params:acme:error:dns",
            Self::OrderNotReady => "urn:ietf:params:acme:error:orderNotReady",
            Self::Caa => "urn:ietf:params:acme:error:caa",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bad_nonce_round_trip() {
        let problem: AcmeProblem = serde_json::from_value(json!({
            "type": "urn:ietf:params:acme:error:badNonce",
            "detail": "JWS has an invalid anti-replay nonce",
            "status": 400
        }))
        .unwrap();
        assert!(problem.has_type(AcmeProblemType::BadNonce));
        assert_eq!(problem.status, Some(400));
    }

    #[test]
    fn subproblems_preserved() {
        let problem: AcmeProblem = serde_json::from_value(json!({
            "type": "urn:ietf:params:acme:error:malformed",
            "detail": "Some of the identifiers failed validation",
            "subproblems": [
                {
                    "type": "urn:ietf:params:acme:error:caa",
                    "detail": "CAA record for foo.example.com prevents issuance",
                    "identifier": { "type": "dns", "value": "foo.example.com" }
                }
            ]
        }))
        .unwrap();
        assert_eq!(problem.subproblems.len(), 1);
        assert!(problem.subproblems[0].has_type(AcmeProblemType::Caa));
    }
}
