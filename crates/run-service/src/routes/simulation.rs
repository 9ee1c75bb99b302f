use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures_util::StreamExt;
use protocol::framing;
use protocol::RunResult;
use token_gate::Identity;

use super::ApiError;
use crate::app::AppState;
use crate::exec::{run_to_completion, spawn_stream, ExecSpec};
use crate::staging::UploadedFile;

/// Fields of the simulation form. Unknown fields are ignored.
#[derive(Debug, Default)]
pub(crate) struct SimulationForm {
    pub(crate) commands: String,
    pub(crate) timeout: Option<u64>,
    pub(crate) basedir: Option<String>,
    pub(crate) job_dirname: Option<String>,
    pub(crate) files: Vec<UploadedFile>,
}

pub(crate) async fn read_form(mut multipart: Multipart) -> Result<SimulationForm, ApiError> {
    let mut form = SimulationForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "commands" => form.commands = field.text().await?,
            "timeout" => {
                let raw = field.text().await?;
                let raw = raw.trim();
                if !raw.is_empty() {
                    let secs = raw.parse::<u64>().map_err(|_| {
                        ApiError::BadRequest(format!("timeout must be a whole number of seconds, got `{raw}`"))
                    })?;
                    form.timeout = Some(secs);
                }
            }
            "basedir" => form.basedir = Some(field.text().await?),
            "job_dirname" => form.job_dirname = Some(field.text().await?),
            "files" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?;
                form.files.push(UploadedFile { file_name, bytes });
            }
            _ => {}
        }
    }
    Ok(form)
}

/// Validates the command and stages the job directory. Nothing is written
/// for requests that would be rejected anyway.
async fn prepare_run(
    state: &AppState,
    identity: &Identity,
    form: SimulationForm,
) -> Result<ExecSpec, ApiError> {
    let timeout = state.limits.resolve_timeout(form.timeout)?;
    let job_dir = state.staging.resolve_job_dir(
        &identity.owner_user_id,
        form.basedir.as_deref(),
        form.job_dirname.as_deref(),
    )?;
    let spec = ExecSpec::parse(&form.commands, job_dir, timeout)?;
    state.staging.prepare(&spec.working_dir, form.files).await?;
    tracing::info!(
        event = "simulation.accepted",
        owner = %identity.owner_user_id,
        job_dir = %spec.working_dir.display(),
        program = %spec.program,
    );
    Ok(spec)
}

pub(crate) async fn stream_simulation(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_form(multipart).await?;
    let spec = prepare_run(&state, &identity, form).await?;
    let frames = spawn_stream(
        spec,
        &state.exec_limits,
        &state.supervisor,
        state.supervisor.run_token(),
    )
    .into_stream()
    .map(|event| Ok::<_, Infallible>(event.to_frame()));
    Ok((
        [(CONTENT_TYPE, framing::CONTENT_TYPE), (CACHE_CONTROL, "no-cache")],
        Body::from_stream(frames),
    )
        .into_response())
}

pub(crate) async fn run_simulation(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    multipart: Multipart,
) -> Result<Json<RunResult>, ApiError> {
    let form = read_form(multipart).await?;
    let spec = prepare_run(&state, &identity, form).await?;
    let job_dir = spec.working_dir.display().to_string();
    let status = run_to_completion(
        spec,
        &state.exec_limits,
        &state.supervisor,
        state.supervisor.run_token(),
    )
    .await;
    Ok(Json(RunResult {
        return_code: status.return_code(),
        status,
        job_dir,
    }))
}
