//! Persistence capability set — the operations the core needs, plus the
//! records owned by persistence (webhook deliveries, metrics, cron,
//! notifications, activity).
//!
//! Durable storage proper is an external collaborator; [`MemoryStore`]
//! backs both the tests and the default binary.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::apps::App;

pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Store error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Skipped,
    Deploying,
    Failed,
}

/// Audit record of one inbound webhook. Created at receipt, mutated once at
/// its terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub app_id: Uuid,
    pub event: String,
    pub branch: String,
    pub commit: String,
    pub message: String,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetric {
    pub app_id: Uuid,
    pub cpu_percent: f64,
    pub mem_usage: u64,
    pub mem_limit: u64,
    pub net_in: u64,
    pub net_out: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: Uuid,
    pub app_id: Uuid,
    pub name: String,
    /// Cron expression, stored opaquely; only on-demand runs fire today.
    pub schedule: String,
    pub command: String,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronExecution {
    pub id: Uuid,
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub exit_code: Option<i64>,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub id: Uuid,
    pub url: String,
    pub enabled: bool,
}

/// CLI push credential. Only the hash is stored; the token itself is shown
/// once at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployToken {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

/// One lifecycle mutation, for the bounded activity feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub app_id: Uuid,
    pub action: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(app_id: Uuid, action: &str, detail: impl Into<String>) -> Self {
        Self {
            app_id,
            action: action.to_string(),
            detail: detail.into(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AppStore: Send + Sync {
    // ── Apps ────────────────────────────────────────────────────

    /// Insert a new app. Fails with Conflict when the name or a non-empty
    /// domain is already taken.
    async fn insert_app(&self, app: App) -> Result<(), StoreError>;

    /// Replace an existing app by id, re-checking uniqueness against others.
    async fn update_app(&self, app: App) -> Result<(), StoreError>;

    async fn delete_app(&self, id: &Uuid) -> Result<(), StoreError>;

    async fn get_app(&self, id: &Uuid) -> Result<App, StoreError>;

    async fn get_app_by_name(&self, name: &str) -> Result<App, StoreError>;

    async fn get_app_by_domain(&self, domain: &str) -> Result<App, StoreError>;

    async fn list_apps(&self) -> Result<Vec<App>, StoreError>;

    // ── Webhook deliveries ──────────────────────────────────────

    async fn insert_delivery(&self, delivery: WebhookDelivery) -> Result<(), StoreError>;

    async fn update_delivery_status(
        &self,
        id: &Uuid,
        status: DeliveryStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Newest first, bounded.
    async fn list_deliveries(
        &self,
        app_id: &Uuid,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, StoreError>;

    // ── Metrics ─────────────────────────────────────────────────

    async fn insert_metric(&self, metric: AppMetric) -> Result<(), StoreError>;

    async fn list_metrics(
        &self,
        app_id: &Uuid,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AppMetric>, StoreError>;

    /// Returns the number of pruned rows.
    async fn delete_metrics_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    // ── Cron ────────────────────────────────────────────────────

    async fn insert_cron_job(&self, job: CronJob) -> Result<(), StoreError>;

    async fn update_cron_job(&self, job: CronJob) -> Result<(), StoreError>;

    /// Deleting a job cascades to its executions.
    async fn delete_cron_job(&self, id: &Uuid) -> Result<(), StoreError>;

    async fn get_cron_job(&self, id: &Uuid) -> Result<CronJob, StoreError>;

    async fn list_cron_jobs(&self, app_id: &Uuid) -> Result<Vec<CronJob>, StoreError>;

    async fn insert_cron_execution(&self, execution: CronExecution) -> Result<(), StoreError>;

    async fn update_cron_execution(&self, execution: CronExecution) -> Result<(), StoreError>;

    async fn list_cron_executions(
        &self,
        job_id: &Uuid,
        limit: usize,
    ) -> Result<Vec<CronExecution>, StoreError>;

    // ── Deploy tokens ───────────────────────────────────────────

    async fn insert_deploy_token(&self, token: DeployToken) -> Result<(), StoreError>;

    async fn list_deploy_tokens(&self) -> Result<Vec<DeployToken>, StoreError>;

    async fn delete_deploy_token(&self, id: &Uuid) -> Result<(), StoreError>;

    // ── Notifications & activity ────────────────────────────────

    async fn list_notification_configs(&self) -> Result<Vec<NotificationConfig>, StoreError>;

    async fn upsert_notification_config(
        &self,
        config: NotificationConfig,
    ) -> Result<(), StoreError>;

    async fn insert_activity(&self, entry: ActivityEntry) -> Result<(), StoreError>;

    async fn list_activity(&self, limit: usize) -> Result<Vec<ActivityEntry>, StoreError>;
}
