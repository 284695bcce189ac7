//! Health controller — periodic liveness probes with auto-restart.
//!
//! One loop ticks every `health_tick_secs`; each app is probed no more
//! often than its own interval. All mutation of the status map happens
//! under a single exclusive lock; probes run outside it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::apps::{App, AppStatus, HealthCheckSpec};
use crate::deploy::Deployer;
use crate::store::AppStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeState {
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: ProbeState,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_checks: u64,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            status: ProbeState::Unknown,
            last_check: None,
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
            total_failures: 0,
            total_checks: 0,
        }
    }
}

/// Shared, read-mostly view of per-app health.
#[derive(Default)]
pub struct HealthMonitor {
    statuses: RwLock<HashMap<Uuid, HealthStatus>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, app_id: &Uuid) -> Option<HealthStatus> {
        self.statuses.read().get(app_id).cloned()
    }

    pub fn snapshot(&self) -> HashMap<Uuid, HealthStatus> {
        self.statuses.read().clone()
    }

    pub fn forget(&self, app_id: &Uuid) {
        self.statuses.write().remove(app_id);
    }
}

/// 2xx and 3xx responses count as alive.
fn classify(status: u16) -> bool {
    (200..400).contains(&status)
}

pub struct HealthController {
    store: Arc<dyn AppStore>,
    deployer: Arc<Deployer>,
    monitor: Arc<HealthMonitor>,
    http: reqwest::Client,
    tick: Duration,
}

impl HealthController {
    pub fn new(
        store: Arc<dyn AppStore>,
        deployer: Arc<Deployer>,
        monitor: Arc<HealthMonitor>,
        tick_secs: u64,
    ) -> Self {
        Self {
            store,
            deployer,
            monitor,
            http: reqwest::Client::new(),
            tick: Duration::from_secs(tick_secs),
        }
    }

    /// Controller loop; exits on the shutdown signal.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting health controller (tick: {:?})", self.tick);
        let mut interval = time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick_once().await,
                _ = shutdown.recv() => {
                    info!("Health controller shutting down");
                    return;
                }
            }
        }
    }

    /// One pass over all probe-eligible apps. Public so tests can drive the
    /// controller without the timer.
    pub async fn tick_once(&self) {
        let apps = match self.store.list_apps().await {
            Ok(apps) => apps,
            Err(e) => {
                warn!(error = %e, "Health tick could not list apps");
                return;
            }
        };

        for app in apps {
            let Some(spec) = app.effective_health_check() else { continue };
            if app.status != AppStatus::Running || app.ports.host_port == 0 {
                continue;
            }

            // Honor the per-app interval.
            let due = {
                let statuses = self.monitor.statuses.read();
                match statuses.get(&app.id).and_then(|s| s.last_check) {
                    Some(last) => {
                        (Utc::now() - last).num_seconds() >= spec.interval_secs as i64
                    }
                    None => true,
                }
            };
            if !due {
                continue;
            }

            self.probe_app(&app, &spec).await;
        }
    }

    async fn probe_app(&self, app: &App, spec: &HealthCheckSpec) {
        let url = format!("http://localhost:{}{}", app.ports.host_port, spec.endpoint);
        let outcome = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(spec.timeout_secs))
            .send()
            .await;

        let (healthy, error) = match outcome {
            Ok(response) if classify(response.status().as_u16()) => (true, None),
            Ok(response) => (false, Some(format!("HTTP {}", response.status().as_u16()))),
            Err(e) => (false, Some(e.to_string())),
        };

        let mut restart_due = false;
        {
            let mut statuses = self.monitor.statuses.write();
            let entry = statuses.entry(app.id).or_default();
            let now = Utc::now();
            entry.last_check = Some(now);
            entry.total_checks += 1;
            if healthy {
                entry.status = ProbeState::Healthy;
                entry.consecutive_failures = 0;
                entry.last_success = Some(now);
                entry.last_error = None;
            } else {
                entry.status = ProbeState::Unhealthy;
                entry.consecutive_failures += 1;
                entry.total_failures += 1;
                entry.last_error = error.clone();
                if spec.auto_restart && entry.consecutive_failures >= spec.max_failures {
                    entry.consecutive_failures = 0;
                    restart_due = true;
                }
            }
        }

        if healthy {
            debug!(app = %app.name, "Health probe ok");
        } else {
            warn!(app = %app.name, error = ?error, "Health probe failed");
        }

        if restart_due {
            info!(app = %app.name, "Failure threshold reached, restarting");
            let deployer = self.deployer.clone();
            let app_id = app.id;
            let name = app.name.clone();
            tokio::spawn(async move {
                if let Err(e) = deployer.restart(&app_id).await {
                    warn!(app = %name, error = %e, "Auto-restart failed");
                }
            });
        }
    }
}
