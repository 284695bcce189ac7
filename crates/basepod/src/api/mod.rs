//! HTTP façade — request routing over the core operations.

pub mod apps;
pub mod cron;
pub mod deploy;
pub mod terminal;
pub mod tls;
pub mod webhook;

use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cron::CronError;
use crate::deploy::DeployError;
use crate::engine::EngineError;
use crate::state::AppState;
use crate::store::StoreError;
use crate::webhook::WebhookError;

/// Uploads are capped at 500 MiB.
pub const MAX_UPLOAD_BYTES: usize = 500 * 1024 * 1024;

/// Uniform JSON error envelope for synchronous failures.
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Conflict(_) => StatusCode::CONFLICT,
            StoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        let status = match &err {
            DeployError::Validation(_) => StatusCode::BAD_REQUEST,
            DeployError::Conflict(_) => StatusCode::CONFLICT,
            DeployError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            DeployError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        let status = match &err {
            WebhookError::AppNotFound(_) => StatusCode::NOT_FOUND,
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::NotConfigured => StatusCode::BAD_REQUEST,
            WebhookError::BadPayload(_) => StatusCode::BAD_REQUEST,
            WebhookError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<CronError> for ApiError {
    fn from(err: CronError) -> Self {
        let status = match &err {
            CronError::Validation(_) => StatusCode::BAD_REQUEST,
            CronError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(platform_health))
        .route("/api/activity", get(activity))
        .route("/api/system/images", get(system_images))
        .route("/api/tokens", get(list_tokens).post(create_token))
        .route("/api/tokens/{id}", axum::routing::delete(delete_token))
        .route(
            "/api/notifications",
            get(list_notifications).post(upsert_notification),
        )
        // Apps
        .route("/api/apps", get(apps::list).post(apps::create))
        .route(
            "/api/apps/{id}",
            get(apps::get_one).put(apps::update).delete(apps::delete),
        )
        .route("/api/apps/{id}/deploy", post(apps::deploy_image))
        .route("/api/apps/{id}/rollback", post(apps::rollback))
        .route("/api/apps/{id}/restart", post(apps::restart))
        .route("/api/apps/{id}/start", post(apps::start))
        .route("/api/apps/{id}/stop", post(apps::stop))
        .route("/api/apps/{id}/logs", get(apps::logs))
        .route("/api/apps/{id}/health", get(apps::health_status))
        .route("/api/apps/{id}/metrics", get(apps::metrics))
        .route("/api/apps/{id}/deployments", get(apps::deployments))
        .route("/api/apps/{id}/terminal", get(terminal::terminal_ws))
        // Webhooks
        .route("/api/apps/{id}/webhook/setup", post(webhook::setup))
        .route("/api/apps/{id}/deliveries", get(webhook::deliveries))
        .route("/hooks/{app}", post(webhook::ingest))
        // Cron
        .route("/api/apps/{id}/cron", get(cron::list).post(cron::create))
        .route(
            "/api/cron/{job}",
            get(cron::get_one).put(cron::update).delete(cron::remove),
        )
        .route("/api/cron/{job}/run", post(cron::run))
        .route("/api/cron/{job}/executions", get(cron::executions))
        // Source deploys: streaming response, big uploads allowed
        .route(
            "/deploy",
            post(deploy::source_deploy).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        // On-demand TLS probe from the proxy
        .route("/internal/tls/ask", get(tls::ask))
        // Unmatched paths on unknown hosts get a clean 404; app hosts are
        // proxied by the host gate below before path routing runs.
        .fallback(crate::proxy::proxy_request)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    crate::proxy::host_gate,
                )),
        )
        .with_state(state)
}

/// Platform health: engine and proxy reachability plus app counts. The
/// endpoint itself always answers; a disconnected engine only degrades the
/// report.
async fn platform_health(State(state): State<AppState>) -> impl IntoResponse {
    let engine_ok = state.engine.ping().await.is_ok();
    let routes_ok = state.routes.ping().await.is_ok();

    let (total, running) = match state.store.list_apps().await {
        Ok(apps) => {
            let running = apps
                .iter()
                .filter(|a| a.status == crate::apps::AppStatus::Running)
                .count();
            (apps.len(), running)
        }
        Err(_) => (0, 0),
    };

    Json(json!({
        "status": if engine_ok { "healthy" } else { "degraded" },
        "engine": if engine_ok { "connected" } else { "disconnected" },
        "proxy": if routes_ok { "connected" } else { "disconnected" },
        "apps": { "total": total, "running": running },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Deserialize)]
struct ActivityQuery {
    #[serde(default = "default_activity_limit")]
    limit: usize,
}

fn default_activity_limit() -> usize {
    50
}

async fn activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state.store.list_activity(query.limit.min(500)).await?;
    Ok(Json(entries))
}

async fn system_images(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let images = state.engine.list_images().await?;
    Ok(Json(images))
}

#[derive(Deserialize)]
struct CreateTokenRequest {
    name: String,
}

/// Create a deploy token. The token value is returned exactly once; only
/// its SHA-256 hash is stored.
async fn create_token(
    State(state): State<AppState>,
    Json(body): Json<CreateTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    use rand::RngCore;
    use sha2::{Digest, Sha256};

    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("token name is required"));
    }

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = format!("bp_{}", hex::encode(bytes));
    let token_hash = hex::encode(Sha256::digest(token.as_bytes()));

    let record = crate::store::DeployToken {
        id: uuid::Uuid::new_v4(),
        name: body.name,
        token_hash,
        created_at: chrono::Utc::now(),
        last_used: None,
    };
    state.store.insert_deploy_token(record.clone()).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": record.id, "name": record.name, "token": token })),
    ))
}

async fn list_tokens(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let tokens = state.store.list_deploy_tokens().await?;
    Ok(Json(tokens))
}

async fn delete_token(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<uuid::Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.delete_deploy_token(&id).await?;
    Ok(Json(json!({ "status": "deleted" })))
}

#[derive(Deserialize)]
struct UpsertNotificationRequest {
    #[serde(default)]
    id: Option<uuid::Uuid>,
    url: String,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

async fn upsert_notification(
    State(state): State<AppState>,
    Json(body): Json<UpsertNotificationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.url.trim().is_empty() {
        return Err(ApiError::bad_request("notification url is required"));
    }
    let config = crate::store::NotificationConfig {
        id: body.id.unwrap_or_else(uuid::Uuid::new_v4),
        url: body.url,
        enabled: body.enabled,
    };
    state.store.upsert_notification_config(config.clone()).await?;
    Ok(Json(config))
}

async fn list_notifications(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let configs = state.store.list_notification_configs().await?;
    Ok(Json(configs))
}
