use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// ACME Directory resource
/// https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.1
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryResource {
    /// New nonce URL
    pub new_nonce: String,

    /// New account URL
    pub new_account: String,

    /// New order URL
    pub new_order: String,

    /// New authorization URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_authz: Option<String>,

    /// Revoke certificate URL
    pub revoke_cert: String,

    /// Key change URL
    pub key_change: String,

    pub meta: DirectoryMetadata,

    /// Fields not covered above, preserved verbatim for round-trip.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMetadata {
    /// A URL identifying the current terms of service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,

    /// An HTTP or HTTPS URL locating a website providing more information about
    /// the ACME server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    /// The hostnames that the ACME server recognizes as referring to itself for
    /// the purposes of CAA record validation as defined in [RFC6844].  Each
    /// string MUST represent the same sequence of ASCII code points that the
    /// server will expect to see as the "Issuer Domain Name" in a CAA issue or
    /// issuewild property tag.  This allows clients to determine the correct
    /// issuer domain name to use when configuring CAA records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caa_identities: Vec<String>,

    /// If this field is present and set to "true", then the CA requires that
    /// all newAccount requests include an "externalAccountBinding" field
    /// associating the new account with an external account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_account_required: Option<bool>,
}
