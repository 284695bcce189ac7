//! App handlers — CRUD plus lifecycle actions over the core operations.
//!
//! Long-running convergence (deploy, rollback, restart) is launched as a
//! detached task; the handler answers immediately with the transitional
//! status and callers poll the app record.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::apps::{App, AppType, HealthCheckSpec};
use crate::deploy::manifest::parse_volume_strings;
use crate::state::AppState;

use super::ApiError;

#[derive(Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
    #[serde(rename = "type", default)]
    pub app_type: Option<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// `name:path` strings.
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub container_port: u16,
    #[serde(default)]
    pub expose_external: bool,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub cpus: f64,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub git_url: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub auto_deploy: bool,
    #[serde(default)]
    pub health_check: Option<HealthCheckSpec>,
}

fn parse_app_type(raw: &Option<String>) -> Result<AppType, ApiError> {
    match raw.as_deref() {
        None | Some("") | Some("container") => Ok(AppType::Container),
        Some("static") => Ok(AppType::Static),
        Some("mlx") => Ok(AppType::Mlx),
        Some(other) => Err(ApiError::bad_request(format!("unknown app type '{}'", other))),
    }
}

pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let apps = state.store.list_apps().await?;
    Ok(Json(apps))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let app = state.store.get_app(&id).await?;
    Ok(Json(app))
}

/// Create an app and converge it in the background: template deploy when a
/// template is named, image deploy when an image is given, placeholder
/// otherwise.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateAppRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("app name is required"));
    }

    let mut app = App::new(&body.name, parse_app_type(&body.app_type)?);
    app.image = body.image.clone();
    app.domain = if body.domain.is_empty() {
        format!("{}.{}", app.name, state.config.root_domain)
    } else {
        body.domain.clone()
    };
    app.aliases = body.aliases.clone();
    app.env = body.env.clone();
    app.volumes = parse_volume_strings(&body.volumes);
    if body.container_port != 0 {
        app.ports.container_port = body.container_port;
    }
    app.ports.expose_external = body.expose_external;
    app.resources.memory_mb = body.memory_mb;
    app.resources.cpus = body.cpus;
    app.ssl.enabled = body.ssl;
    app.deploy.git_url = body.git_url.clone();
    app.deploy.branch = if body.branch.is_empty() {
        "main".to_string()
    } else {
        body.branch.clone()
    };
    app.deploy.auto_deploy = body.auto_deploy;
    app.health_check = body.health_check.clone();

    state.store.insert_app(app.clone()).await?;

    let deployer = state.deployer.clone();
    let app_id = app.id;
    let template = body.template.clone();
    let image = body.image.clone();
    if app.app_type != AppType::Mlx {
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let result = if !template.is_empty() {
                deployer.template_deploy(&app_id, &template, cancel).await
            } else if !image.is_empty() {
                deployer.image_deploy(&app_id, Some(image), cancel).await
            } else {
                deployer.placeholder_deploy(&app_id).await
            };
            if let Err(e) = result {
                tracing::warn!(app_id = %app_id, error = %e, "Initial deploy failed");
            }
        });
    }

    Ok((StatusCode::CREATED, Json(app)))
}

#[derive(Deserialize)]
pub struct UpdateAppRequest {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub volumes: Option<Vec<String>>,
    #[serde(default)]
    pub container_port: Option<u16>,
    #[serde(default)]
    pub expose_external: Option<bool>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub cpus: Option<f64>,
    #[serde(default)]
    pub ssl: Option<bool>,
    #[serde(default)]
    pub git_url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub auto_deploy: Option<bool>,
    #[serde(default)]
    pub health_check: Option<HealthCheckSpec>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateAppRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let old = state.store.get_app(&id).await?;
    let mut new = old.clone();

    if let Some(domain) = body.domain {
        new.domain = domain;
    }
    if let Some(aliases) = body.aliases {
        new.aliases = aliases;
    }
    if let Some(env) = body.env {
        new.env = env;
    }
    if let Some(volumes) = body.volumes {
        new.volumes = parse_volume_strings(&volumes);
    }
    if let Some(port) = body.container_port {
        new.ports.container_port = port;
    }
    if let Some(external) = body.expose_external {
        new.ports.expose_external = external;
    }
    if let Some(memory) = body.memory_mb {
        new.resources.memory_mb = memory;
    }
    if let Some(cpus) = body.cpus {
        new.resources.cpus = cpus;
    }
    if let Some(ssl) = body.ssl {
        new.ssl.enabled = ssl;
    }
    if let Some(git_url) = body.git_url {
        new.deploy.git_url = git_url;
    }
    if let Some(branch) = body.branch {
        new.deploy.branch = branch;
    }
    if let Some(auto_deploy) = body.auto_deploy {
        new.deploy.auto_deploy = auto_deploy;
    }
    if body.health_check.is_some() {
        new.health_check = body.health_check;
    }

    state.deployer.apply_update(&old, &mut new).await?;
    Ok(Json(new))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.deployer.delete_app(&id).await?;
    state.health.forget(&id);
    Ok(Json(json!({ "status": "deleted" })))
}

#[derive(Deserialize, Default)]
pub struct DeployImageRequest {
    #[serde(default)]
    pub image: Option<String>,
}

pub async fn deploy_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<DeployImageRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    // Fail fast on unknown apps before detaching.
    state.store.get_app(&id).await?;
    let image = body.and_then(|Json(b)| b.image);

    let deployer = state.deployer.clone();
    tokio::spawn(async move {
        if let Err(e) = deployer.image_deploy(&id, image, CancellationToken::new()).await {
            tracing::warn!(app_id = %id, error = %e, "Image deploy failed");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "deploying" }))))
}

#[derive(Deserialize, Default)]
pub struct RollbackRequest {
    #[serde(default)]
    pub deployment_id: Option<Uuid>,
}

pub async fn rollback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<RollbackRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let target = body.and_then(|Json(b)| b.deployment_id);
    state.deployer.rollback(&id, target).await?;
    let app = state.store.get_app(&id).await?;
    Ok(Json(app))
}

pub async fn restart(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.get_app(&id).await?;
    let deployer = state.deployer.clone();
    tokio::spawn(async move {
        if let Err(e) = deployer.restart(&id).await {
            tracing::warn!(app_id = %id, error = %e, "Restart failed");
        }
    });
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "restarting" }))))
}

pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.deployer.start_app(&id).await?;
    let app = state.store.get_app(&id).await?;
    Ok(Json(app))
}

pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.deployer.stop_app(&id).await?;
    let app = state.store.get_app(&id).await?;
    Ok(Json(app))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_tail")]
    tail: u32,
}

fn default_tail() -> u32 {
    100
}

pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let app = state.store.get_app(&id).await?;
    let container = app
        .container_id
        .clone()
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| app.container_name());

    let chunks = state
        .engine
        .container_logs(&container, query.tail.min(5000))
        .await?;

    let mut stdout = String::new();
    let mut stderr = String::new();
    // Tolerate engines that hand back raw multiplexed frames.
    for chunk in chunks.into_iter().flat_map(crate::engine::stream::normalize) {
        let text = String::from_utf8_lossy(&chunk.data);
        if chunk.stderr {
            stderr.push_str(&text);
        } else {
            stdout.push_str(&text);
        }
    }
    Ok(Json(json!({ "stdout": stdout, "stderr": stderr })))
}

pub async fn health_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.get_app(&id).await?;
    match state.health.get(&id) {
        Some(status) => Ok(Json(serde_json::to_value(status).unwrap_or_default())),
        None => Ok(Json(json!({ "status": "unknown" }))),
    }
}

#[derive(Deserialize)]
pub struct MetricsQuery {
    #[serde(default = "default_hours")]
    hours: i64,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_hours() -> i64 {
    24
}

fn default_limit() -> usize {
    500
}

pub async fn metrics(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<MetricsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.get_app(&id).await?;
    let since = chrono::Utc::now() - chrono::Duration::hours(query.hours.clamp(1, 24 * 7));
    let metrics = state
        .store
        .list_metrics(&id, since, query.limit.min(5000))
        .await?;
    Ok(Json(metrics))
}

pub async fn deployments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let app = state.store.get_app(&id).await?;
    Ok(Json(app.deployments))
}
