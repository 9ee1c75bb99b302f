use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use protocol::jobs::{JobRecord, JobSubmission};
use token_gate::Identity;

use super::ApiError;
use crate::app::AppState;
use crate::exec::ExecSpec;
use crate::jobs::CancelOutcome;

pub(crate) async fn submit_job(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(submission): Json<JobSubmission>,
) -> Result<(StatusCode, Json<JobRecord>), ApiError> {
    let timeout = state.limits.resolve_job_timeout(submission.timeout)?;
    // An explicit job_dir is used as is; otherwise a fresh directory is made.
    let dirname = submission.job_dir.as_ref().map(|_| "");
    let job_dir = state.staging.resolve_job_dir(
        &identity.owner_user_id,
        submission.job_dir.as_deref(),
        dirname,
    )?;
    let spec = ExecSpec::parse(&submission.command, job_dir, timeout)?;
    state.staging.prepare(&spec.working_dir, Vec::new()).await?;
    let record = state
        .jobs
        .submit(
            &identity.owner_user_id,
            spec,
            &submission.command,
            state.exec_limits.clone(),
        )
        .await;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

pub(crate) async fn list_jobs(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Json<Vec<JobRecord>> {
    Json(state.jobs.list(&identity.owner_user_id).await)
}

// Nested under `/owners/:owner_user_id` too, so params are read by name.
fn job_id(params: &HashMap<String, String>) -> &str {
    params.get("job_id").map(String::as_str).unwrap_or_default()
}

fn not_found(job_id: &str) -> ApiError {
    ApiError::NotFound(format!("job {job_id} not found"))
}

pub(crate) async fn get_job(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(params): Path<HashMap<String, String>>,
) -> Result<Json<JobRecord>, ApiError> {
    let job_id = job_id(&params);
    state
        .jobs
        .get(&identity.owner_user_id, job_id)
        .await
        .map(Json)
        .ok_or_else(|| not_found(job_id))
}

/// 202 once the stop is requested; the record turns `CANCELLED` when the
/// process group is gone.
pub(crate) async fn cancel_job(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(params): Path<HashMap<String, String>>,
) -> Result<(StatusCode, Json<JobRecord>), ApiError> {
    let job_id = job_id(&params);
    match state.jobs.cancel(&identity.owner_user_id, job_id).await {
        Some(CancelOutcome::Requested(record)) => Ok((StatusCode::ACCEPTED, Json(record))),
        Some(CancelOutcome::AlreadyFinished(record)) => Err(ApiError::Conflict(format!(
            "job {job_id} already finished with status {:?}",
            record.current_status
        ))),
        None => Err(not_found(job_id)),
    }
}
