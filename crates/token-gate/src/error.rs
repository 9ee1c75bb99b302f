use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing auth token")]
    Missing,
    #[error("Invalid token: {0}")]
    Invalid(String),
    #[error("owner_user_id does not match token user_id: {owner} != {user_id}")]
    Mismatch { owner: String, user_id: String },
    #[error("Inconsistent owner_user_id: {path} vs {query}")]
    Ambiguous { path: String, query: String },
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Missing | Self::Invalid(_) => StatusCode::UNAUTHORIZED,
            Self::Mismatch { .. } => StatusCode::FORBIDDEN,
            Self::Ambiguous { .. } => StatusCode::BAD_REQUEST,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Invalid(_) => "invalid",
            Self::Mismatch { .. } => "mismatch",
            Self::Ambiguous { .. } => "ambiguous",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "detail": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(AuthError::Missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::Invalid("bad signature".to_string()).status(),
            StatusCode::UNAUTHORIZED
        );
        let mismatch = AuthError::Mismatch {
            owner: "alice".to_string(),
            user_id: "bob".to_string(),
        };
        assert_eq!(mismatch.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            mismatch.to_string(),
            "owner_user_id does not match token user_id: alice != bob"
        );
        let ambiguous = AuthError::Ambiguous {
            path: "alice".to_string(),
            query: "bob".to_string(),
        };
        assert_eq!(ambiguous.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn response_carries_detail_body() {
        let response = AuthError::Missing.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
