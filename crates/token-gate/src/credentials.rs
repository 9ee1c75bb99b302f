use std::collections::HashMap;

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;

use crate::config::GateConfig;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Authorization,
    Cookie,
    Query,
    Header,
}

impl CredentialSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authorization => "authorization",
            Self::Cookie => "cookie",
            Self::Query => "query",
            Self::Header => "header",
        }
    }
}

/// First non-empty credential in priority order: bearer header, cookie, query, custom header.
pub fn extract_token(
    config: &GateConfig,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Option<(String, CredentialSource)> {
    if let Some(token) = header_value(headers, AUTHORIZATION.as_str())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
    {
        return Some((token.to_string(), CredentialSource::Authorization));
    }
    if let Some(token) = cookie_value(headers, &config.cookie_name) {
        return Some((token, CredentialSource::Cookie));
    }
    if let Some(token) = query
        .get(&config.query_param)
        .filter(|token| !token.is_empty())
    {
        return Some((token.clone(), CredentialSource::Query));
    }
    header_value(headers, &config.header_name)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| (token.to_string(), CredentialSource::Header))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            let Some((key, value)) = pair.trim().split_once('=') else {
                continue;
            };
            if key.trim() != name {
                continue;
            }
            let value = value.trim().trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
