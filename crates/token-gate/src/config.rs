use serde::Deserialize;

/// Owner assumed when a request names nobody; lets single-tenant setups run without tokens.
pub const ANONYMOUS_USER: &str = "default_unnamed_user";

const DEFAULT_BYPASS_PATHS: [&str; 4] = ["/health", "/docs", "/openapi.json", "/info"];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub anonymous_user: String,
    pub bypass_paths: Vec<String>,
    pub cookie_name: String,
    pub query_param: String,
    pub header_name: String,
    pub owner_param: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            anonymous_user: ANONYMOUS_USER.to_string(),
            bypass_paths: DEFAULT_BYPASS_PATHS.iter().map(|p| p.to_string()).collect(),
            cookie_name: "auth_token".to_string(),
            query_param: "auth_token".to_string(),
            header_name: "X-Deepmd-User-Auth-Token".to_string(),
            owner_param: "owner_user_id".to_string(),
        }
    }
}

impl GateConfig {
    pub fn is_bypass(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|bypass| bypass == path)
    }
}
