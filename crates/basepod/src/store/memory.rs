//! In-memory store — backs tests and the default binary.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::apps::App;

use super::{
    ActivityEntry, AppMetric, AppStore, CronExecution, CronJob, DeliveryStatus, DeployToken,
    NotificationConfig, StoreError, WebhookDelivery,
};

#[derive(Default)]
struct Tables {
    apps: HashMap<Uuid, App>,
    deliveries: Vec<WebhookDelivery>,
    metrics: Vec<AppMetric>,
    cron_jobs: HashMap<Uuid, CronJob>,
    cron_executions: Vec<CronExecution>,
    deploy_tokens: HashMap<Uuid, DeployToken>,
    notifications: HashMap<Uuid, NotificationConfig>,
    activity: Vec<ActivityEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_unique(tables: &Tables, app: &App, skip_id: Option<&Uuid>) -> Result<(), StoreError> {
    for other in tables.apps.values() {
        if Some(&other.id) == skip_id {
            continue;
        }
        if other.name == app.name {
            return Err(StoreError::Conflict(format!(
                "app name '{}' already exists",
                app.name
            )));
        }
        if !app.domain.is_empty() && other.domain == app.domain {
            return Err(StoreError::Conflict(format!(
                "domain '{}' already in use",
                app.domain
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl AppStore for MemoryStore {
    async fn insert_app(&self, app: App) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        check_unique(&tables, &app, None)?;
        tables.apps.insert(app.id, app);
        Ok(())
    }

    async fn update_app(&self, app: App) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if !tables.apps.contains_key(&app.id) {
            return Err(StoreError::NotFound(format!("app {}", app.id)));
        }
        check_unique(&tables, &app, Some(&app.id))?;
        tables.apps.insert(app.id, app);
        Ok(())
    }

    async fn delete_app(&self, id: &Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        tables
            .apps
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(format!("app {}", id)))?;
        tables.metrics.retain(|m| &m.app_id != id);
        tables.deliveries.retain(|d| &d.app_id != id);
        let job_ids: Vec<Uuid> = tables
            .cron_jobs
            .values()
            .filter(|j| &j.app_id == id)
            .map(|j| j.id)
            .collect();
        tables.cron_jobs.retain(|_, j| &j.app_id != id);
        tables
            .cron_executions
            .retain(|e| !job_ids.contains(&e.job_id));
        Ok(())
    }

    async fn get_app(&self, id: &Uuid) -> Result<App, StoreError> {
        self.tables
            .read()
            .apps
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("app {}", id)))
    }

    async fn get_app_by_name(&self, name: &str) -> Result<App, StoreError> {
        self.tables
            .read()
            .apps
            .values()
            .find(|a| a.name == name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("app '{}'", name)))
    }

    async fn get_app_by_domain(&self, domain: &str) -> Result<App, StoreError> {
        self.tables
            .read()
            .apps
            .values()
            .find(|a| {
                !domain.is_empty()
                    && (a.domain == domain || a.aliases.iter().any(|al| al == domain))
            })
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("domain '{}'", domain)))
    }

    async fn list_apps(&self) -> Result<Vec<App>, StoreError> {
        let mut apps: Vec<App> = self.tables.read().apps.values().cloned().collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(apps)
    }

    async fn insert_delivery(&self, delivery: WebhookDelivery) -> Result<(), StoreError> {
        self.tables.write().deliveries.push(delivery);
        Ok(())
    }

    async fn update_delivery_status(
        &self,
        id: &Uuid,
        status: DeliveryStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let delivery = tables
            .deliveries
            .iter_mut()
            .find(|d| &d.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("delivery {}", id)))?;
        delivery.status = status;
        delivery.error = error;
        Ok(())
    }

    async fn list_deliveries(
        &self,
        app_id: &Uuid,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let tables = self.tables.read();
        let mut out: Vec<WebhookDelivery> = tables
            .deliveries
            .iter()
            .filter(|d| &d.app_id == app_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn insert_metric(&self, metric: AppMetric) -> Result<(), StoreError> {
        self.tables.write().metrics.push(metric);
        Ok(())
    }

    async fn list_metrics(
        &self,
        app_id: &Uuid,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AppMetric>, StoreError> {
        let tables = self.tables.read();
        let mut out: Vec<AppMetric> = tables
            .metrics
            .iter()
            .filter(|m| &m.app_id == app_id && m.recorded_at >= since)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn delete_metrics_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.write();
        let before = tables.metrics.len();
        tables.metrics.retain(|m| m.recorded_at >= cutoff);
        Ok((before - tables.metrics.len()) as u64)
    }

    async fn insert_cron_job(&self, job: CronJob) -> Result<(), StoreError> {
        self.tables.write().cron_jobs.insert(job.id, job);
        Ok(())
    }

    async fn update_cron_job(&self, job: CronJob) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if !tables.cron_jobs.contains_key(&job.id) {
            return Err(StoreError::NotFound(format!("cron job {}", job.id)));
        }
        tables.cron_jobs.insert(job.id, job);
        Ok(())
    }

    async fn delete_cron_job(&self, id: &Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        tables
            .cron_jobs
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(format!("cron job {}", id)))?;
        tables.cron_executions.retain(|e| &e.job_id != id);
        Ok(())
    }

    async fn get_cron_job(&self, id: &Uuid) -> Result<CronJob, StoreError> {
        self.tables
            .read()
            .cron_jobs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("cron job {}", id)))
    }

    async fn list_cron_jobs(&self, app_id: &Uuid) -> Result<Vec<CronJob>, StoreError> {
        let tables = self.tables.read();
        let mut jobs: Vec<CronJob> = tables
            .cron_jobs
            .values()
            .filter(|j| &j.app_id == app_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(jobs)
    }

    async fn insert_cron_execution(&self, execution: CronExecution) -> Result<(), StoreError> {
        self.tables.write().cron_executions.push(execution);
        Ok(())
    }

    async fn update_cron_execution(&self, execution: CronExecution) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let slot = tables
            .cron_executions
            .iter_mut()
            .find(|e| e.id == execution.id)
            .ok_or_else(|| StoreError::NotFound(format!("execution {}", execution.id)))?;
        *slot = execution;
        Ok(())
    }

    async fn list_cron_executions(
        &self,
        job_id: &Uuid,
        limit: usize,
    ) -> Result<Vec<CronExecution>, StoreError> {
        let tables = self.tables.read();
        let mut out: Vec<CronExecution> = tables
            .cron_executions
            .iter()
            .filter(|e| &e.job_id == job_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn insert_deploy_token(&self, token: DeployToken) -> Result<(), StoreError> {
        self.tables.write().deploy_tokens.insert(token.id, token);
        Ok(())
    }

    async fn list_deploy_tokens(&self) -> Result<Vec<DeployToken>, StoreError> {
        let mut tokens: Vec<DeployToken> =
            self.tables.read().deploy_tokens.values().cloned().collect();
        tokens.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tokens)
    }

    async fn delete_deploy_token(&self, id: &Uuid) -> Result<(), StoreError> {
        self.tables
            .write()
            .deploy_tokens
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(format!("deploy token {}", id)))?;
        Ok(())
    }

    async fn list_notification_configs(&self) -> Result<Vec<NotificationConfig>, StoreError> {
        Ok(self.tables.read().notifications.values().cloned().collect())
    }

    async fn upsert_notification_config(
        &self,
        config: NotificationConfig,
    ) -> Result<(), StoreError> {
        self.tables.write().notifications.insert(config.id, config);
        Ok(())
    }

    async fn insert_activity(&self, entry: ActivityEntry) -> Result<(), StoreError> {
        self.tables.write().activity.push(entry);
        Ok(())
    }

    async fn list_activity(&self, limit: usize) -> Result<Vec<ActivityEntry>, StoreError> {
        let tables = self.tables.read();
        let mut out: Vec<ActivityEntry> = tables.activity.iter().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::AppType;

    #[tokio::test]
    async fn test_insert_rejects_duplicate_name() {
        let store = MemoryStore::new();
        let mut a = App::new("blog", AppType::Container);
        a.domain = "blog.dev".to_string();
        store.insert_app(a).await.unwrap();

        let b = App::new("blog", AppType::Container);
        let err = store.insert_app(b).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_domain() {
        let store = MemoryStore::new();
        let mut a = App::new("blog", AppType::Container);
        a.domain = "blog.dev".to_string();
        store.insert_app(a).await.unwrap();

        let mut b = App::new("other", AppType::Container);
        b.domain = "blog.dev".to_string();
        assert!(matches!(
            store.insert_app(b).await.unwrap_err(),
            StoreError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_empty_domains_do_not_conflict() {
        let store = MemoryStore::new();
        store.insert_app(App::new("a", AppType::Container)).await.unwrap();
        store.insert_app(App::new("b", AppType::Container)).await.unwrap();
        assert_eq!(store.list_apps().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_get_by_domain_matches_aliases() {
        let store = MemoryStore::new();
        let mut app = App::new("blog", AppType::Container);
        app.domain = "blog.dev".to_string();
        app.aliases = vec!["www.blog.dev".to_string()];
        let id = app.id;
        store.insert_app(app).await.unwrap();

        assert_eq!(store.get_app_by_domain("www.blog.dev").await.unwrap().id, id);
        assert!(store.get_app_by_domain("nope.dev").await.is_err());
        assert!(store.get_app_by_domain("").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_app_cascades() {
        let store = MemoryStore::new();
        let app = App::new("blog", AppType::Container);
        let app_id = app.id;
        store.insert_app(app).await.unwrap();

        let job = CronJob {
            id: Uuid::new_v4(),
            app_id,
            name: "backup".to_string(),
            schedule: "0 3 * * *".to_string(),
            command: "pg_dump".to_string(),
            enabled: true,
            last_run: None,
            last_status: None,
            last_error: None,
        };
        let job_id = job.id;
        store.insert_cron_job(job).await.unwrap();
        store
            .insert_cron_execution(CronExecution {
                id: Uuid::new_v4(),
                job_id,
                started_at: Utc::now(),
                ended_at: None,
                status: super::super::ExecutionStatus::Running,
                exit_code: None,
                output: String::new(),
            })
            .await
            .unwrap();

        store.delete_app(&app_id).await.unwrap();
        assert!(store.get_cron_job(&job_id).await.is_err());
        assert!(store
            .list_cron_executions(&job_id, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_metrics_prune() {
        let store = MemoryStore::new();
        let app_id = Uuid::new_v4();
        let old = AppMetric {
            app_id,
            cpu_percent: 1.0,
            mem_usage: 1,
            mem_limit: 2,
            net_in: 0,
            net_out: 0,
            recorded_at: Utc::now() - chrono::Duration::days(8),
        };
        let fresh = AppMetric {
            recorded_at: Utc::now(),
            ..old.clone()
        };
        store.insert_metric(old).await.unwrap();
        store.insert_metric(fresh).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(7);
        let pruned = store.delete_metrics_before(cutoff).await.unwrap();
        assert_eq!(pruned, 1);
        let left = store
            .list_metrics(&app_id, Utc::now() - chrono::Duration::days(30), 100)
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
    }

    #[tokio::test]
    async fn test_delivery_status_transition() {
        let store = MemoryStore::new();
        let app_id = Uuid::new_v4();
        let delivery = WebhookDelivery {
            id: Uuid::new_v4(),
            app_id,
            event: "push".to_string(),
            branch: "main".to_string(),
            commit: "abc1234".to_string(),
            message: "fix".to_string(),
            status: DeliveryStatus::Deploying,
            error: None,
            created_at: Utc::now(),
        };
        let id = delivery.id;
        store.insert_delivery(delivery).await.unwrap();
        store
            .update_delivery_status(&id, DeliveryStatus::Failed, Some("build broke".into()))
            .await
            .unwrap();

        let listed = store.list_deliveries(&app_id, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, DeliveryStatus::Failed);
        assert_eq!(listed[0].error.as_deref(), Some("build broke"));
    }
}
