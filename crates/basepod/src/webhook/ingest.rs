//! Webhook ingest — filter push events and hand matching ones to the git
//! deploy flow, keeping a delivery record for every inbound call.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::apps::App;
use crate::deploy::git::CommitInfo;
use crate::deploy::Deployer;
use crate::store::{AppStore, DeliveryStatus, StoreError, WebhookDelivery};

use super::signature::{generate_secret, verify_signature};

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("app not found: {0}")]
    AppNotFound(String),
    #[error("webhook not configured for this app")]
    NotConfigured,
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("malformed payload: {0}")]
    BadPayload(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What the endpoint answers immediately; the deploy itself runs in the
/// background.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WebhookResponse {
    Pong,
    Skipped { reason: String },
    Deploying,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref", default)]
    git_ref: String,
    #[serde(default)]
    head_commit: Option<HeadCommit>,
}

#[derive(Debug, Deserialize)]
struct HeadCommit {
    #[serde(default)]
    id: String,
    #[serde(default)]
    message: String,
}

/// Truncate a commit hash to the 7 characters shown everywhere.
fn short_hash(hash: &str) -> String {
    hash.chars().take(7).collect()
}

/// First line of a commit message.
fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().to_string()
}

fn branch_of(git_ref: &str) -> String {
    git_ref
        .strip_prefix("refs/heads/")
        .unwrap_or(git_ref)
        .to_string()
}

async fn record_delivery(
    store: &Arc<dyn AppStore>,
    app: &App,
    event: &str,
    branch: &str,
    commit: &str,
    message: &str,
    status: DeliveryStatus,
) -> Result<Uuid, StoreError> {
    let delivery = WebhookDelivery {
        id: Uuid::new_v4(),
        app_id: app.id,
        event: event.to_string(),
        branch: branch.to_string(),
        commit: commit.to_string(),
        message: message.to_string(),
        status,
        error: None,
        created_at: Utc::now(),
    };
    let id = delivery.id;
    store.insert_delivery(delivery).await?;
    Ok(id)
}

/// Handle one inbound webhook call.
///
/// Verifies the signature against the app's stored secret, filters the
/// event, and for an accepted push records a `deploying` delivery and
/// launches the git pipeline in the background. The delivery flips to
/// `success` or `failed` when that pipeline finishes.
pub async fn handle_webhook(
    deployer: Arc<Deployer>,
    store: Arc<dyn AppStore>,
    app_name: &str,
    event_type: &str,
    signature: &str,
    body: &[u8],
) -> Result<WebhookResponse, WebhookError> {
    // The hook path carries the app name or, for older setups, the app id.
    let app = match store.get_app_by_name(app_name).await {
        Ok(app) => app,
        Err(_) => match app_name.parse::<Uuid>() {
            Ok(id) => store
                .get_app(&id)
                .await
                .map_err(|_| WebhookError::AppNotFound(app_name.to_string()))?,
            Err(_) => return Err(WebhookError::AppNotFound(app_name.to_string())),
        },
    };

    if app.deploy.webhook_secret.is_empty() {
        return Err(WebhookError::NotConfigured);
    }
    if !verify_signature(body, &app.deploy.webhook_secret, signature) {
        return Err(WebhookError::InvalidSignature);
    }

    if event_type == "ping" {
        record_delivery(&store, &app, "ping", "", "", "", DeliveryStatus::Success).await?;
        return Ok(WebhookResponse::Pong);
    }

    if event_type != "push" {
        record_delivery(&store, &app, event_type, "", "", "", DeliveryStatus::Skipped).await?;
        return Ok(WebhookResponse::Skipped {
            reason: format!("unsupported event '{}'", event_type),
        });
    }

    let payload: PushPayload = serde_json::from_slice(body)
        .map_err(|e| WebhookError::BadPayload(e.to_string()))?;
    let branch = branch_of(&payload.git_ref);
    let (commit, message) = payload
        .head_commit
        .as_ref()
        .map(|c| (short_hash(&c.id), first_line(&c.message)))
        .unwrap_or_default();

    if branch != app.deploy.branch {
        record_delivery(&store, &app, "push", &branch, &commit, &message, DeliveryStatus::Skipped)
            .await?;
        return Ok(WebhookResponse::Skipped {
            reason: "branch mismatch".to_string(),
        });
    }

    if !app.deploy.auto_deploy {
        record_delivery(&store, &app, "push", &branch, &commit, &message, DeliveryStatus::Skipped)
            .await?;
        return Ok(WebhookResponse::Skipped {
            reason: "auto-deploy disabled".to_string(),
        });
    }

    let delivery_id =
        record_delivery(&store, &app, "push", &branch, &commit, &message, DeliveryStatus::Deploying)
            .await?;

    let commit_info = CommitInfo {
        hash: commit,
        message,
        branch,
    };
    let app_id = app.id;
    tokio::spawn(async move {
        // Build output from webhook deploys goes to the tracing log only.
        let (tx, mut rx) = mpsc::channel::<String>(64);
        let logger = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                tracing::info!(target: "basepod::deploy", "{}", line);
            }
        });

        let result = deployer
            .git_deploy(&app_id, commit_info, tx, CancellationToken::new())
            .await;
        let _ = logger.await;

        let (status, error) = match result {
            Ok(()) => (DeliveryStatus::Success, None),
            Err(e) => (DeliveryStatus::Failed, Some(e.to_string())),
        };
        if let Err(e) = store.update_delivery_status(&delivery_id, status, error).await {
            tracing::error!(delivery = %delivery_id, error = %e, "Delivery status update failed");
        }
    });

    Ok(WebhookResponse::Deploying)
}

/// Generate (or regenerate) the app's webhook secret. The secret is
/// returned exactly once; regenerating overwrites the old one.
pub async fn setup_webhook(
    store: Arc<dyn AppStore>,
    app_id: &Uuid,
    public_base: &str,
) -> Result<(String, String), WebhookError> {
    let mut app = store.get_app(app_id).await?;
    let secret = generate_secret();
    app.deploy.webhook_secret = secret.clone();
    app.updated_at = Utc::now();
    store.update_app(app).await?;

    let url = format!("{}/hooks/{}", public_base.trim_end_matches('/'), app_id);
    Ok((url, secret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::AppType;
    use crate::deploy::testutil::harness;
    use crate::webhook::signature::sign;
    use std::time::Duration;

    fn push_body(branch: &str, commit: &str, message: &str) -> Vec<u8> {
        serde_json::json!({
            "ref": format!("refs/heads/{}", branch),
            "head_commit": { "id": commit, "message": message }
        })
        .to_string()
        .into_bytes()
    }

    async fn seeded_webhook_app(h: &crate::deploy::testutil::Harness) -> App {
        let mut app = App::new("hooked", AppType::Container);
        app.deploy.webhook_secret = "s3cr3t".to_string();
        app.deploy.branch = "main".to_string();
        app.deploy.auto_deploy = true;
        app.deploy.git_url = "file:///definitely/not/a/repo".to_string();
        h.store.insert_app(app.clone()).await.unwrap();
        app
    }

    #[tokio::test]
    async fn test_invalid_signature_rejected_without_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let app = seeded_webhook_app(&h).await;
        let deployer = Arc::new(h.deployer);
        let store: Arc<dyn AppStore> = h.store.clone();

        let body = push_body("main", "abc", "msg");
        let err = handle_webhook(deployer, store.clone(), "hooked", "push", "sha256=bad", &body)
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature));
        assert!(store.list_deliveries(&app.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ping_answers_pong() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let app = seeded_webhook_app(&h).await;
        let deployer = Arc::new(h.deployer);
        let store: Arc<dyn AppStore> = h.store.clone();

        let body = b"{}".to_vec();
        let response = handle_webhook(
            deployer,
            store.clone(),
            "hooked",
            "ping",
            &sign(&body, "s3cr3t"),
            &body,
        )
        .await
        .unwrap();
        assert_eq!(response, WebhookResponse::Pong);

        let deliveries = store.list_deliveries(&app.id, 10).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].status, DeliveryStatus::Success);
    }

    #[tokio::test]
    async fn test_branch_mismatch_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let app = seeded_webhook_app(&h).await;
        let deployer = Arc::new(h.deployer);
        let store: Arc<dyn AppStore> = h.store.clone();

        let body = push_body("feature", "deadbeefcafe", "wip");
        let response = handle_webhook(
            deployer,
            store.clone(),
            "hooked",
            "push",
            &sign(&body, "s3cr3t"),
            &body,
        )
        .await
        .unwrap();
        assert_eq!(
            response,
            WebhookResponse::Skipped {
                reason: "branch mismatch".to_string()
            }
        );

        let deliveries = store.list_deliveries(&app.id, 10).await.unwrap();
        assert_eq!(deliveries[0].status, DeliveryStatus::Skipped);
        assert_eq!(deliveries[0].branch, "feature");
        assert_eq!(deliveries[0].commit, "deadbee");
        // The app itself is untouched
        let stored = store.get_app(&app.id).await.unwrap();
        assert_eq!(stored.status, crate::apps::AppStatus::Pending);
    }

    #[tokio::test]
    async fn test_auto_deploy_disabled_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let mut app = seeded_webhook_app(&h).await;
        app.deploy.auto_deploy = false;
        h.store.update_app(app.clone()).await.unwrap();
        let deployer = Arc::new(h.deployer);
        let store: Arc<dyn AppStore> = h.store.clone();

        let body = push_body("main", "abc", "msg");
        let response = handle_webhook(
            deployer,
            store,
            "hooked",
            "push",
            &sign(&body, "s3cr3t"),
            &body,
        )
        .await
        .unwrap();
        assert!(matches!(response, WebhookResponse::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_matching_push_deploys_and_delivery_reaches_terminal_state() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let app = seeded_webhook_app(&h).await;
        let deployer = Arc::new(h.deployer);
        let store: Arc<dyn AppStore> = h.store.clone();

        let body = push_body("main", "0123456789abcdef", "feat: ship it\n\nlonger body");
        let response = handle_webhook(
            deployer,
            store.clone(),
            "hooked",
            "push",
            &sign(&body, "s3cr3t"),
            &body,
        )
        .await
        .unwrap();
        assert_eq!(response, WebhookResponse::Deploying);

        // The background clone fails fast (bogus repo); the delivery must
        // leave `deploying` within bounded time.
        let mut status = DeliveryStatus::Deploying;
        for _ in 0..100 {
            let deliveries = store.list_deliveries(&app.id, 10).await.unwrap();
            status = deliveries[0].status;
            if status != DeliveryStatus::Deploying {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(status, DeliveryStatus::Failed);

        let deliveries = store.list_deliveries(&app.id, 10).await.unwrap();
        assert_eq!(deliveries[0].commit, "0123456");
        assert_eq!(deliveries[0].message, "feat: ship it");
        assert!(deliveries[0].error.is_some());
    }

    #[tokio::test]
    async fn test_setup_webhook_regenerates_secret() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let app = seeded_webhook_app(&h).await;
        let store: Arc<dyn AppStore> = h.store.clone();

        let (url, first) =
            setup_webhook(store.clone(), &app.id, "https://d.example.com").await.unwrap();
        assert_eq!(url, format!("https://d.example.com/hooks/{}", app.id));
        assert_eq!(first.len(), 64);

        let (_, second) =
            setup_webhook(store.clone(), &app.id, "https://d.example.com").await.unwrap();
        assert_ne!(first, second);
        let stored = store.get_app(&app.id).await.unwrap();
        assert_eq!(stored.deploy.webhook_secret, second);
    }

    #[test]
    fn test_short_hash_and_first_line() {
        assert_eq!(short_hash("0123456789"), "0123456");
        assert_eq!(short_hash("ab"), "ab");
        assert_eq!(first_line("subject\nbody\nmore"), "subject");
        assert_eq!(first_line(""), "");
        assert_eq!(branch_of("refs/heads/main"), "main");
        assert_eq!(branch_of("main"), "main");
    }
}
