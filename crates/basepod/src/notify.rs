//! Outbound notifications — POSTs deploy outcomes to configured targets.
//!
//! Dispatch is best effort with a 10 second timeout; failures are logged
//! and never affect the deployment that triggered them.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::apps::App;
use crate::store::AppStore;

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn AppStore>,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(store: Arc<dyn AppStore>) -> Self {
        Self {
            store,
            http: reqwest::Client::builder()
                .timeout(DISPATCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Announce a deploy outcome to every enabled notification target.
    pub async fn deploy_event(&self, app: &App, status: &str, detail: &str) {
        let configs = match self.store.list_notification_configs().await {
            Ok(configs) => configs,
            Err(e) => {
                tracing::warn!(error = %e, "Could not load notification targets");
                return;
            }
        };

        let payload = json!({
            "event": "deploy",
            "app": app.name,
            "app_id": app.id,
            "status": status,
            "image": app.image,
            "detail": detail,
            "at": chrono::Utc::now().to_rfc3339(),
        });

        for config in configs.into_iter().filter(|c| c.enabled) {
            match self.http.post(&config.url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    tracing::warn!(url = %config.url, status = %response.status(), "Notification rejected");
                }
                Err(e) => {
                    tracing::warn!(url = %config.url, error = %e, "Notification dispatch failed");
                }
            }
        }
    }
}
