//! Cron endpoints — job CRUD and on-demand runs.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::state::AppState;
use crate::store::CronJob;

use super::ApiError;

#[derive(Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    pub schedule: String,
    pub command: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub async fn list(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.get_app(&app_id).await?;
    let jobs = state.store.list_cron_jobs(&app_id).await?;
    Ok(Json(jobs))
}

pub async fn create(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    Json(body): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.get_app(&app_id).await?;
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("job name is required"));
    }
    if body.command.trim().is_empty() {
        return Err(ApiError::bad_request("job command is required"));
    }

    let job = CronJob {
        id: Uuid::new_v4(),
        app_id,
        name: body.name,
        schedule: body.schedule,
        command: body.command,
        enabled: body.enabled,
        last_run: None,
        last_status: None,
        last_error: None,
    };
    state.store.insert_cron_job(job.clone()).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.store.get_cron_job(&job_id).await?;
    Ok(Json(job))
}

#[derive(Deserialize)]
pub struct UpdateJobRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(body): Json<UpdateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut job = state.store.get_cron_job(&job_id).await?;
    if let Some(name) = body.name {
        job.name = name;
    }
    if let Some(schedule) = body.schedule {
        job.schedule = schedule;
    }
    if let Some(command) = body.command {
        job.command = command;
    }
    if let Some(enabled) = body.enabled {
        job.enabled = enabled;
    }
    state.store.update_cron_job(job.clone()).await?;
    Ok(Json(job))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.delete_cron_job(&job_id).await?;
    Ok(Json(json!({ "status": "deleted" })))
}

/// POST /api/cron/{job}/run — start the job now; the execution record is
/// finalized in the background.
pub async fn run(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let execution_id = state.cron.run_job(&job_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "execution_id": execution_id, "status": "running" })),
    ))
}

#[derive(Deserialize)]
pub struct ExecutionsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

pub async fn executions(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Query(query): Query<ExecutionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.get_cron_job(&job_id).await?;
    let executions = state
        .store
        .list_cron_executions(&job_id, query.limit.min(100))
        .await?;
    Ok(Json(executions))
}
