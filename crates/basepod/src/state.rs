//! Shared application state handed to every handler and controller.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::BasepodConfig;
use crate::cron::CronRunner;
use crate::deploy::Deployer;
use crate::engine::EngineOps;
use crate::health::HealthMonitor;
use crate::notify::Notifier;
use crate::routes::RouteOps;
use crate::store::AppStore;

#[derive(Clone)]
pub struct AppState {
    pub config: BasepodConfig,
    pub engine: Arc<dyn EngineOps>,
    pub routes: Arc<dyn RouteOps>,
    pub store: Arc<dyn AppStore>,
    pub deployer: Arc<Deployer>,
    pub health: Arc<HealthMonitor>,
    pub cron: Arc<CronRunner>,
    /// Client for the app domain proxy: redirects are never followed.
    pub proxy_http: reqwest::Client,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        config: BasepodConfig,
        engine: Arc<dyn EngineOps>,
        routes: Arc<dyn RouteOps>,
        store: Arc<dyn AppStore>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let deployer = Arc::new(Deployer::new(
            config.clone(),
            engine.clone(),
            routes.clone(),
            store.clone(),
            Notifier::new(store.clone()),
        ));
        let cron = Arc::new(CronRunner::new(store.clone(), engine.clone()));
        Self {
            config,
            engine,
            routes,
            store,
            deployer,
            health: Arc::new(HealthMonitor::new()),
            cron,
            proxy_http: crate::proxy::build_proxy_client(),
            shutdown_tx,
        }
    }
}
