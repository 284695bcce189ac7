//! Webhook endpoints — inbound hook ingest, setup, and delivery history.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::state::AppState;
use crate::webhook::{handle_webhook, setup_webhook, WebhookResponse};

use super::ApiError;

/// POST /hooks/{app} — the forge-facing endpoint.
pub async fn ingest(
    State(state): State<AppState>,
    Path(app): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let event = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("push");
    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let response = handle_webhook(
        state.deployer.clone(),
        state.store.clone(),
        &app,
        event,
        signature,
        &body,
    )
    .await?;

    let payload = match response {
        WebhookResponse::Pong => json!({ "status": "pong" }),
        WebhookResponse::Skipped { reason } => json!({ "status": "skipped", "reason": reason }),
        WebhookResponse::Deploying => json!({ "status": "deploying" }),
    };
    Ok(Json(payload))
}

/// POST /api/apps/{id}/webhook/setup — generate (or rotate) the secret.
/// The secret is only ever returned here.
pub async fn setup(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let public_base = format!("https://{}", state.config.dashboard_host());
    let (url, secret) = setup_webhook(state.store.clone(), &id, &public_base).await?;
    Ok(Json(json!({ "url": url, "secret": secret })))
}

#[derive(Deserialize)]
pub struct DeliveriesQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

/// GET /api/apps/{id}/deliveries — bounded delivery history, newest first.
pub async fn deliveries(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeliveriesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.get_app(&id).await?;
    let deliveries = state.store.list_deliveries(&id, query.limit.min(200)).await?;
    Ok(Json(deliveries))
}
