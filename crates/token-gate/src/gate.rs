use std::collections::HashMap;

use axum::http::HeaderMap;

use crate::claims::{Claims, TokenVerifier};
use crate::config::GateConfig;
use crate::credentials::extract_token;
use crate::error::AuthError;
use crate::owner::resolve_owner;

/// Who a request acts for. Inserted into request extensions by the middleware.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub owner_user_id: String,
    pub claims: Option<Claims>,
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        self.claims.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Bypass,
    Anonymous(Identity),
    Authorized(Identity),
}

impl GateDecision {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Bypass => None,
            Self::Anonymous(identity) | Self::Authorized(identity) => Some(identity),
        }
    }
}

/// The parts of an inbound request the gate looks at.
#[derive(Debug)]
pub struct GateRequest<'a> {
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub query: &'a HashMap<String, String>,
    pub path_owner: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct TokenGate {
    config: GateConfig,
    verifier: TokenVerifier,
}

impl TokenGate {
    pub fn new(config: GateConfig, verifier: TokenVerifier) -> Self {
        Self { config, verifier }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn authorize(&self, request: &GateRequest<'_>) -> Result<GateDecision, AuthError> {
        if self.config.is_bypass(request.path) {
            return Ok(GateDecision::Bypass);
        }

        let query_owner = request.query.get(&self.config.owner_param).map(String::as_str);
        let owner = resolve_owner(request.path_owner, query_owner)?;

        let Some((token, source)) = extract_token(&self.config, request.headers, request.query)
        else {
            let anonymous = &self.config.anonymous_user;
            return match owner {
                None => Ok(GateDecision::Anonymous(self.anonymous_identity())),
                Some(owner) if &owner == anonymous => {
                    Ok(GateDecision::Anonymous(self.anonymous_identity()))
                }
                Some(_) => Err(AuthError::Missing),
            };
        };

        let claims = self.verifier.verify(&token)?;
        let user_id = claims.subject().to_string();
        if let Some(owner) = owner {
            if owner != user_id {
                return Err(AuthError::Mismatch { owner, user_id });
            }
        }
        tracing::debug!(
            event = "auth.authorized",
            user_id = %user_id,
            source = source.as_str(),
        );
        Ok(GateDecision::Authorized(Identity {
            owner_user_id: user_id,
            claims: Some(claims),
        }))
    }

    fn anonymous_identity(&self) -> Identity {
        Identity {
            owner_user_id: self.config.anonymous_user.clone(),
            claims: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ANONYMOUS_USER;
    use crate::test_keys::{sign, verifier};
    use axum::http::HeaderValue;
    use serde_json::json;

    fn gate() -> TokenGate {
        TokenGate::new(GateConfig::default(), verifier())
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header"),
        );
        headers
    }

    fn owner_query(owner: &str) -> HashMap<String, String> {
        HashMap::from([("owner_user_id".to_string(), owner.to_string())])
    }

    #[test]
    fn bypass_paths_skip_everything() {
        let headers = bearer("garbage");
        let query = HashMap::new();
        let request = GateRequest {
            path: "/health",
            headers: &headers,
            query: &query,
            path_owner: Some("alice"),
        };
        assert_eq!(gate().authorize(&request), Ok(GateDecision::Bypass));
    }

    #[test]
    fn anonymous_default_passes_without_token() {
        let headers = HeaderMap::new();
        let explicit = owner_query(ANONYMOUS_USER);
        let empty = HashMap::new();
        for query in [&explicit, &empty] {
            let request = GateRequest {
                path: "/lammps-simulation-stream",
                headers: &headers,
                query,
                path_owner: None,
            };
            let decision = gate().authorize(&request).expect("anonymous");
            let identity = decision.identity().expect("identity");
            assert!(identity.is_anonymous());
            assert_eq!(identity.owner_user_id, ANONYMOUS_USER);
        }
    }

    #[test]
    fn named_owner_without_token_is_missing() {
        let headers = HeaderMap::new();
        let query = HashMap::new();
        let request = GateRequest {
            path: "/jobs",
            headers: &headers,
            query: &query,
            path_owner: Some("alice"),
        };
        assert_eq!(gate().authorize(&request), Err(AuthError::Missing));
    }

    #[test]
    fn owner_mismatch_is_forbidden() {
        let headers = bearer(&sign(&json!({ "user_id": "bob" })));
        let query = HashMap::new();
        let request = GateRequest {
            path: "/owners/alice/jobs",
            headers: &headers,
            query: &query,
            path_owner: Some("alice"),
        };
        assert_eq!(
            gate().authorize(&request),
            Err(AuthError::Mismatch {
                owner: "alice".to_string(),
                user_id: "bob".to_string(),
            })
        );
    }

    #[test]
    fn ambiguous_owner_rejected_before_token() {
        let headers = bearer("not-even-a-token");
        let query = owner_query("bob");
        let request = GateRequest {
            path: "/owners/alice/jobs",
            headers: &headers,
            query: &query,
            path_owner: Some("alice"),
        };
        assert!(matches!(
            gate().authorize(&request),
            Err(AuthError::Ambiguous { .. })
        ));
    }

    #[test]
    fn owner_via_path_or_query_authorizes_alike() {
        let headers = bearer(&sign(&json!({ "user_id": "alice" })));
        let none = HashMap::new();
        let query = owner_query("alice");
        let by_path = GateRequest {
            path: "/owners/alice/jobs",
            headers: &headers,
            query: &none,
            path_owner: Some("alice"),
        };
        let by_query = GateRequest {
            path: "/jobs",
            headers: &headers,
            query: &query,
            path_owner: None,
        };
        let gate = gate();
        let first = gate.authorize(&by_path).expect("path");
        let second = gate.authorize(&by_query).expect("query");
        assert_eq!(first, second);
        assert_eq!(first.identity().expect("identity").owner_user_id, "alice");
    }

    #[test]
    fn token_without_owner_acts_for_subject() {
        let headers = bearer(&sign(&json!({ "user_id": "carol" })));
        let query = HashMap::new();
        let request = GateRequest {
            path: "/jobs",
            headers: &headers,
            query: &query,
            path_owner: None,
        };
        match gate().authorize(&request).expect("authorized") {
            GateDecision::Authorized(identity) => {
                assert_eq!(identity.owner_user_id, "carol");
                assert!(!identity.is_anonymous());
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn invalid_token_is_rejected_even_for_anonymous_owner() {
        let headers = bearer("abc.def.ghi");
        let query = owner_query(ANONYMOUS_USER);
        let request = GateRequest {
            path: "/jobs",
            headers: &headers,
            query: &query,
            path_owner: None,
        };
        assert!(matches!(
            gate().authorize(&request),
            Err(AuthError::Invalid(_))
        ));
    }
}
