//! Metrics collector — periodic container stats sampling with retention.
//!
//! One loop ticks every `metrics_tick_secs`: every running app with a known
//! container gets one sample persisted, then anything older than the
//! retention window is pruned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::apps::AppStatus;
use crate::engine::EngineOps;
use crate::store::{AppMetric, AppStore};

pub struct MetricsCollector {
    store: Arc<dyn AppStore>,
    engine: Arc<dyn EngineOps>,
    tick: Duration,
    retention_days: i64,
}

impl MetricsCollector {
    pub fn new(
        store: Arc<dyn AppStore>,
        engine: Arc<dyn EngineOps>,
        tick_secs: u64,
        retention_days: i64,
    ) -> Self {
        Self {
            store,
            engine,
            tick: Duration::from_secs(tick_secs),
            retention_days,
        }
    }

    /// Collector loop; exits on the shutdown signal.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Starting metrics collector (tick: {:?}, retention: {}d)",
            self.tick, self.retention_days
        );
        let mut interval = time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick_once().await,
                _ = shutdown.recv() => {
                    info!("Metrics collector shutting down");
                    return;
                }
            }
        }
    }

    /// One sampling pass plus retention pruning. Public for tests.
    pub async fn tick_once(&self) {
        let apps = match self.store.list_apps().await {
            Ok(apps) => apps,
            Err(e) => {
                warn!(error = %e, "Metrics tick could not list apps");
                return;
            }
        };

        for app in apps {
            if app.status != AppStatus::Running {
                continue;
            }
            let Some(container_id) = app.container_id.as_deref().filter(|id| !id.is_empty())
            else {
                continue;
            };

            match self.engine.container_stats(container_id).await {
                Ok(sample) => {
                    let metric = AppMetric {
                        app_id: app.id,
                        cpu_percent: sample.cpu_percent,
                        mem_usage: sample.mem_usage,
                        mem_limit: sample.mem_limit,
                        net_in: sample.net_in,
                        net_out: sample.net_out,
                        recorded_at: Utc::now(),
                    };
                    if let Err(e) = self.store.insert_metric(metric).await {
                        warn!(app = %app.name, error = %e, "Metric insert failed");
                    }
                }
                Err(e) if e.is_not_found() => {
                    debug!(app = %app.name, "Container gone, skipping stats");
                }
                Err(e) => {
                    warn!(app = %app.name, error = %e, "Stats sampling failed");
                }
            }
        }

        let cutoff = Utc::now() - chrono::Duration::days(self.retention_days);
        match self.store.delete_metrics_before(cutoff).await {
            Ok(0) => {}
            Ok(pruned) => debug!(pruned, "Pruned old metrics"),
            Err(e) => warn!(error = %e, "Metrics pruning failed"),
        }
    }
}
