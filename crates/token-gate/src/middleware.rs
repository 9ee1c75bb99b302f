use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, RawPathParams, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::gate::{GateDecision, GateRequest, TokenGate};

/// Axum middleware running the gate; install with `route_layer` so path
/// parameters of the matched route are visible.
pub async fn require_token(
    State(gate): State<Arc<TokenGate>>,
    path_params: Option<RawPathParams>,
    mut req: Request,
    next: Next,
) -> Response {
    let query = Query::<HashMap<String, String>>::try_from_uri(req.uri())
        .map(|Query(query)| query)
        .unwrap_or_default();
    let owner_param = gate.config().owner_param.as_str();
    let path_owner = path_params.as_ref().and_then(|params| {
        params
            .iter()
            .find(|(key, _)| *key == owner_param)
            .map(|(_, value)| value.to_string())
    });

    let decision = {
        let request = GateRequest {
            path: req.uri().path(),
            headers: req.headers(),
            query: &query,
            path_owner: path_owner.as_deref(),
        };
        gate.authorize(&request)
    };

    match decision {
        Ok(GateDecision::Bypass) => next.run(req).await,
        Ok(GateDecision::Anonymous(identity)) | Ok(GateDecision::Authorized(identity)) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(err) => {
            tracing::warn!(
                event = "auth.rejected",
                path = %req.uri().path(),
                reason = err.reason(),
                status = %err.status(),
                "request rejected by token gate"
            );
            err.into_response()
        }
    }
}
