//! Deployment pipeline — convergence of an App toward its desired state.
//!
//! Flows live in sibling modules which add `impl Deployer` blocks:
//! `image.rs` (placeholder, image, restart, rollback, delete),
//! `template.rs` (catalog deploys), `source.rs` (tarball push) and
//! `git.rs` (webhook-driven pulls). Shared helpers here cover container
//! reconciliation, port assignment, and route installation.

pub mod dockerfile;
pub mod git;
pub mod image;
pub mod manifest;
pub mod source;
pub mod template;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::apps::{App, AppStatus, AppType};
use crate::config::BasepodConfig;
use crate::engine::{
    CreateContainerOpts, EngineError, EngineOps, PortPublish, LABEL_APP, LABEL_APP_ID,
};
use crate::notify::Notifier;
use crate::ports;
use crate::routes::{alias_route_id, primary_route_id, static_route_id, Route, RouteOps};
use crate::store::{ActivityEntry, AppStore, StoreError};

pub use manifest::SourceDeployConfig;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Deployment cancelled")]
    Cancelled,
}

pub struct Deployer {
    pub(crate) config: BasepodConfig,
    pub(crate) engine: Arc<dyn EngineOps>,
    pub(crate) routes: Arc<dyn RouteOps>,
    pub(crate) store: Arc<dyn AppStore>,
    pub(crate) notifier: Notifier,
}

impl Deployer {
    pub fn new(
        config: BasepodConfig,
        engine: Arc<dyn EngineOps>,
        routes: Arc<dyn RouteOps>,
        store: Arc<dyn AppStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            config,
            engine,
            routes,
            store,
            notifier,
        }
    }

    // ── Container reconciliation ────────────────────────────────

    /// Stop and remove any prior container, by stored id AND by canonical
    /// name. "Missing" counts as "already achieved".
    pub(crate) async fn remove_prior_container(&self, app: &App) {
        let mut targets: Vec<String> = Vec::new();
        if let Some(id) = &app.container_id {
            if !id.is_empty() {
                targets.push(id.clone());
            }
        }
        targets.push(app.container_name());

        for target in targets {
            match self.engine.stop_container(&target, self.config.stop_grace_secs).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!(container = %target, error = %e, "Stop before remove failed"),
            }
            match self.engine.remove_container(&target, true).await {
                Ok(()) => tracing::debug!(container = %target, "Removed prior container"),
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!(container = %target, error = %e, "Remove prior container failed"),
            }
        }
    }

    /// Assign the deterministic host port once, probing the other apps'
    /// assignments to resolve collisions.
    pub(crate) async fn ensure_host_port(&self, app: &mut App) -> Result<(), DeployError> {
        if app.ports.host_port != 0 {
            return Ok(());
        }
        let in_use: Vec<u16> = self
            .store
            .list_apps()
            .await?
            .iter()
            .filter(|other| other.id != app.id)
            .map(|other| other.ports.host_port)
            .filter(|port| *port != 0)
            .collect();
        app.ports.host_port = ports::assign_host_port(&app.id.to_string(), &in_use);
        Ok(())
    }

    /// Build engine create options from App state.
    pub(crate) fn container_opts(&self, app: &App, image: &str) -> CreateContainerOpts {
        let mut env: Vec<String> = app
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        env.sort();

        let volumes = app
            .volumes
            .iter()
            .map(|mount| {
                let source = mount
                    .host_path
                    .clone()
                    .unwrap_or_else(|| app.volume_name(&mount.name));
                format!("{}:{}", source, mount.container_path)
            })
            .collect();

        let mut labels = std::collections::HashMap::new();
        labels.insert(LABEL_APP.to_string(), app.name.clone());
        labels.insert(LABEL_APP_ID.to_string(), app.id.to_string());

        CreateContainerOpts {
            name: app.container_name(),
            image: image.to_string(),
            env,
            volumes,
            ports: vec![PortPublish {
                container_port: app.ports.container_port,
                host_port: app.ports.host_port,
                protocol: app.ports.protocol.clone(),
                external: app.ports.expose_external,
            }],
            labels,
            memory_bytes: (app.resources.memory_mb as i64) * 1024 * 1024,
            cpus: app.resources.cpus,
            command: None,
        }
    }

    /// Remove prior state, create and start a container from `image`, and
    /// record the new container id on the App.
    pub(crate) async fn run_from_image(
        &self,
        app: &mut App,
        image: &str,
    ) -> Result<(), DeployError> {
        self.remove_prior_container(app).await;
        self.ensure_host_port(app).await?;

        let opts = self.container_opts(app, image);
        let container_id = self.engine.create_container(opts).await?;
        self.engine.start_container(&container_id).await?;

        app.container_id = Some(container_id);
        app.image = image.to_string();
        Ok(())
    }

    // ── Routes ──────────────────────────────────────────────────

    /// Install the primary route plus one alias route per alias. Static
    /// apps get a file-serving route instead. Failures are logged, never
    /// fatal: the deployment already succeeded.
    pub(crate) async fn install_app_routes(&self, app: &App) {
        if app.domain.is_empty() {
            return;
        }

        if app.app_type == AppType::Static {
            let root = self.config.static_dir(&app.name);
            if let Err(e) = self
                .routes
                .add_static_route(&app.domain, &root.to_string_lossy())
                .await
            {
                tracing::warn!(app = %app.name, error = %e, "Static route install failed");
            }
            return;
        }

        let upstream = format!("localhost:{}", app.ports.host_port);
        let primary = Route {
            id: primary_route_id(&app.name),
            domain: app.domain.clone(),
            upstream: upstream.clone(),
            enable_ssl: app.ssl.enabled,
        };
        if let Err(e) = self.routes.add_route(primary).await {
            tracing::warn!(app = %app.name, error = %e, "Primary route install failed");
        }

        let prefix = app.id_prefix();
        for alias in &app.aliases {
            let route = Route {
                id: alias_route_id(&prefix, alias),
                domain: alias.clone(),
                upstream: upstream.clone(),
                enable_ssl: app.ssl.enabled,
            };
            if let Err(e) = self.routes.add_route(route).await {
                tracing::warn!(app = %app.name, alias = %alias, error = %e, "Alias route install failed");
            }
        }
    }

    /// Remove every route the app may own: primary, aliases, static.
    pub(crate) async fn remove_app_routes(&self, app: &App) {
        let mut ids = vec![primary_route_id(&app.name)];
        let prefix = app.id_prefix();
        for alias in &app.aliases {
            ids.push(alias_route_id(&prefix, alias));
        }
        if !app.domain.is_empty() {
            ids.push(static_route_id(&app.domain));
        }
        for id in ids {
            if let Err(e) = self.routes.remove_route(&id).await {
                tracing::warn!(route = %id, error = %e, "Route removal failed");
            }
        }
    }

    /// Reinstall the routes of every running app from persisted state.
    /// Called at startup so the proxy config is a pure function of the
    /// store.
    pub async fn sync_routes(&self) -> Result<(), DeployError> {
        for app in self.store.list_apps().await? {
            if app.status == AppStatus::Running {
                self.install_app_routes(&app).await;
            }
        }
        Ok(())
    }

    // ── Status & audit ──────────────────────────────────────────

    pub(crate) async fn persist(&self, app: &mut App) -> Result<(), DeployError> {
        app.updated_at = chrono::Utc::now();
        self.store.update_app(app.clone()).await?;
        Ok(())
    }

    /// Mark an app failed, best effort: the original error is what the
    /// caller reports.
    pub(crate) async fn mark_failed(&self, app_id: &uuid::Uuid) {
        if let Ok(mut app) = self.store.get_app(app_id).await {
            app.status = AppStatus::Failed;
            app.updated_at = chrono::Utc::now();
            if let Err(e) = self.store.update_app(app).await {
                tracing::error!(app_id = %app_id, error = %e, "Failed to persist failed status");
            }
        }
    }

    pub(crate) async fn record_activity(&self, app: &App, action: &str, detail: impl Into<String>) {
        let entry = ActivityEntry::new(app.id, action, detail);
        if let Err(e) = self.store.insert_activity(entry).await {
            tracing::warn!(error = %e, "Activity insert failed");
        }
    }

    /// Reject the deprecated workload variant before any state changes.
    pub(crate) fn reject_mlx(&self, app: &App) -> Result<(), DeployError> {
        if app.app_type == AppType::Mlx {
            return Err(DeployError::Validation(
                "mlx apps are no longer deployable".to_string(),
            ));
        }
        Ok(())
    }
}

/// Send accumulated log lines into a sink, ignoring a dropped receiver.
pub(crate) async fn emit(log: &mpsc::Sender<String>, line: impl Into<String>) {
    let _ = log.send(line.into()).await;
}
