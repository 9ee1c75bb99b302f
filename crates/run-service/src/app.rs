use std::sync::Arc;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use token_gate::{require_token, TokenGate};

use crate::config::{LimitsConfig, ServiceConfig};
use crate::exec::{ExecLimits, Supervisor};
use crate::jobs::JobRegistry;
use crate::routes::jobs::{cancel_job, get_job, list_jobs, submit_job};
use crate::routes::simulation::{run_simulation, stream_simulation};
use crate::routes::{health, info};
use crate::staging::Staging;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) staging: Arc<Staging>,
    pub(crate) limits: Arc<LimitsConfig>,
    pub(crate) exec_limits: ExecLimits,
    pub(crate) supervisor: Supervisor,
    pub(crate) jobs: JobRegistry,
}

impl AppState {
    pub(crate) fn new(config: &ServiceConfig, supervisor: Supervisor) -> Self {
        Self {
            staging: Arc::new(Staging::new(
                config.storage.root_path(),
                config.storage.default_basedir.clone(),
            )),
            limits: Arc::new(config.limits.clone()),
            exec_limits: config.limits.exec_limits(),
            jobs: JobRegistry::new(config.limits.max_concurrent_jobs, supervisor.clone()),
            supervisor,
        }
    }
}

fn capabilities() -> Router<AppState> {
    Router::new()
        .route("/lammps-simulation-stream", post(stream_simulation))
        .route("/lammps-simulation-job", post(run_simulation))
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
}

/// Every capability is served both at the root and under
/// `/owners/:owner_user_id`; the gate sees the owner segment either way.
pub(crate) fn build_router(state: AppState, gate: Arc<TokenGate>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .merge(capabilities())
        .nest("/owners/:owner_user_id", capabilities())
        .route_layer(middleware::from_fn_with_state(gate, require_token))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
        .layer(middleware::from_fn(log_http_request))
}

async fn log_http_request(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;
    let status = response.status();
    // The query string may carry a token, so only the path is logged.
    tracing::info!(
        event = "http.request",
        method = %method,
        path = %path,
        status = %status,
        "http request"
    );
    response
}
