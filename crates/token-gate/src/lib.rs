//! Token gate placed in front of every capability of the run service.
//!
//! A request is either let through untouched (bypass path, or the anonymous
//! default owner with no credential), authorized by an RS256 token whose
//! `user_id` agrees with the claimed owner, or rejected with an [`AuthError`].

mod claims;
mod config;
mod credentials;
mod error;
mod gate;
mod middleware;
mod owner;

pub use claims::{Claims, TokenVerifier};
pub use config::{GateConfig, ANONYMOUS_USER};
pub use credentials::{extract_token, CredentialSource};
pub use error::AuthError;
pub use gate::{GateDecision, GateRequest, Identity, TokenGate};
pub use middleware::require_token;
pub use owner::resolve_owner;

#[cfg(test)]
pub(crate) mod test_keys {
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::Value;

    pub(crate) const PUBLIC_KEY: &[u8] = include_bytes!("testdata/signing_key.pub.pem");
    const PRIVATE_KEY: &[u8] = include_bytes!("testdata/signing_key.pem");
    const OTHER_PRIVATE_KEY: &[u8] = include_bytes!("testdata/other_key.pem");

    pub(crate) fn sign(claims: &Value) -> String {
        sign_with(PRIVATE_KEY, claims)
    }

    pub(crate) fn sign_with_other_key(claims: &Value) -> String {
        sign_with(OTHER_PRIVATE_KEY, claims)
    }

    fn sign_with(pem: &[u8], claims: &Value) -> String {
        let key = EncodingKey::from_rsa_pem(pem).expect("private key");
        encode(&Header::new(Algorithm::RS256), claims, &key).expect("sign token")
    }

    pub(crate) fn verifier() -> super::TokenVerifier {
        super::TokenVerifier::from_rsa_pem(PUBLIC_KEY).expect("public key")
    }
}
