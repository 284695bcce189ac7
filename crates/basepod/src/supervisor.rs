//! Core supervisor — owns the background controllers and their shutdown.
//!
//! Constructed once at startup; `start` spawns the health and metrics
//! loops, `stop` broadcasts the shutdown signal and waits for them.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::health::HealthController;
use crate::metrics::MetricsCollector;
use crate::state::AppState;

pub struct CoreSupervisor {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl CoreSupervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// The sender handlers subscribe to for cooperative cancellation.
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Spawn the background controllers against the shared state.
    pub fn start(&mut self, state: &AppState) {
        let health = Arc::new(HealthController::new(
            state.store.clone(),
            state.deployer.clone(),
            state.health.clone(),
            state.config.health_tick_secs,
        ));
        self.handles
            .push(tokio::spawn(health.run(self.shutdown_tx.subscribe())));

        let metrics = Arc::new(MetricsCollector::new(
            state.store.clone(),
            state.engine.clone(),
            state.config.metrics_tick_secs,
            state.config.metrics_retention_days,
        ));
        self.handles
            .push(tokio::spawn(metrics.run(self.shutdown_tx.subscribe())));

        info!("Core supervisor started {} background controllers", self.handles.len());
    }

    /// Signal every controller and wait for them to drain.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("Core supervisor stopped");
    }
}

impl Default for CoreSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
