use std::collections::HashSet;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    /// Only set on claims returned by [`TokenVerifier::verify`].
    pub fn subject(&self) -> &str {
        self.user_id.as_deref().unwrap_or_default()
    }
}

/// Verifies RS256 tokens issued by the account service against its public key.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, jsonwebtoken::errors::Error> {
        let key = DecodingKey::from_rsa_pem(pem)?;
        let mut validation = Validation::new(Algorithm::RS256);
        // `exp` is checked when present; tokens without it are still accepted.
        validation.required_spec_claims = HashSet::new();
        validation.validate_aud = false;
        Ok(Self { key, validation })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|err| AuthError::Invalid(err.to_string()))?;
        let claims = data.claims;
        match claims.user_id.as_deref() {
            Some(user_id) if !user_id.is_empty() => Ok(claims),
            _ => Err(AuthError::Invalid("user_id cannot be empty".to_string())),
        }
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_keys::{sign, sign_with_other_key, verifier};
    use serde_json::json;

    #[test]
    fn valid_token_decodes_claims() {
        let token = sign(&json!({
            "user_id": "user__workos__01H",
            "username": "alice",
            "auth_provider": "workos",
            "team": "md",
        }));
        let claims = verifier().verify(&token).expect("valid");
        assert_eq!(claims.subject(), "user__workos__01H");
        assert_eq!(claims.username.as_deref(), Some("alice"));
        assert_eq!(claims.extra.get("team"), Some(&json!("md")));
    }

    #[test]
    fn verification_is_repeatable() {
        let token = sign(&json!({ "user_id": "bob" }));
        let verifier = verifier();
        let first = verifier.verify(&token).expect("first");
        let second = verifier.verify(&token).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn altered_signature_fails() {
        let token = sign(&json!({ "user_id": "bob" }));
        let (head, signature) = token.rsplit_once('.').expect("three parts");
        let flipped = if signature.starts_with('A') { "B" } else { "A" };
        let tampered = format!("{head}.{flipped}{}", &signature[1..]);
        assert!(matches!(
            verifier().verify(&tampered),
            Err(AuthError::Invalid(_))
        ));
    }

    #[test]
    fn token_from_other_key_fails() {
        let token = sign_with_other_key(&json!({ "user_id": "bob" }));
        assert!(matches!(verifier().verify(&token), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn missing_or_empty_user_id_fails() {
        for claims in [
            json!({ "username": "bob", "auth_provider": "workos" }),
            json!({ "user_id": "" }),
            json!({ "user_id": null, "role": "admin" }),
        ] {
            let token = sign(&claims);
            assert!(
                matches!(verifier().verify(&token), Err(AuthError::Invalid(_))),
                "claims {claims} should be rejected"
            );
        }
    }

    #[test]
    fn expired_token_fails() {
        let token = sign(&json!({ "user_id": "bob", "exp": 1_000_000_000u64 }));
        assert!(matches!(verifier().verify(&token), Err(AuthError::Invalid(_))));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(
            verifier().verify("not-a-jwt"),
            Err(AuthError::Invalid(_))
        ));
    }
}
