//! Image-based flows — placeholder deploy, image deploy, restart,
//! rollback, start/stop, delete.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::apps::{App, AppStatus, AppType, DeployOutcome, DeploymentRecord};

use super::{DeployError, Deployer};

/// Image used for the placeholder container a fresh app starts with.
const PLACEHOLDER_IMAGE: &str = "nginx:alpine";

impl Deployer {
    /// Placeholder deploy: runs on create so a new app answers on its
    /// domain before the first real deployment.
    pub async fn placeholder_deploy(&self, app_id: &Uuid) -> Result<(), DeployError> {
        let mut app = self.store.get_app(app_id).await?;
        self.reject_mlx(&app)?;

        let result = self.placeholder_inner(&mut app).await;
        match result {
            Ok(()) => {
                app.status = AppStatus::Running;
                self.persist(&mut app).await?;
                self.install_app_routes(&app).await;
                self.record_activity(&app, "create", "placeholder container started")
                    .await;
                Ok(())
            }
            Err(e) => {
                self.mark_failed(app_id).await;
                Err(e)
            }
        }
    }

    async fn placeholder_inner(&self, app: &mut App) -> Result<(), DeployError> {
        self.engine.pull_image(PLACEHOLDER_IMAGE).await?;
        self.run_from_image(app, PLACEHOLDER_IMAGE).await
    }

    /// Image deploy: pull and run a concrete image (the supplied one, or
    /// the app's current image).
    pub async fn image_deploy(
        &self,
        app_id: &Uuid,
        image: Option<String>,
        cancel: CancellationToken,
    ) -> Result<(), DeployError> {
        let mut app = self.store.get_app(app_id).await?;
        self.reject_mlx(&app)?;

        let image = match image {
            Some(image) if !image.is_empty() => image,
            _ if !app.image.is_empty() => app.image.clone(),
            _ => {
                return Err(DeployError::Validation(
                    "no image specified and the app has none".to_string(),
                ))
            }
        };

        app.status = AppStatus::Deploying;
        self.persist(&mut app).await?;

        let result = self.image_deploy_inner(&mut app, &image, &cancel).await;
        match result {
            Ok(()) => {
                app.status = AppStatus::Running;
                app.push_deployment(DeploymentRecord::new(&image, DeployOutcome::Success));
                self.persist(&mut app).await?;
                self.install_app_routes(&app).await;
                self.record_activity(&app, "deploy", format!("image {}", image))
                    .await;
                self.notifier.deploy_event(&app, "success", &image).await;
                Ok(())
            }
            Err(e) => {
                self.mark_failed(app_id).await;
                if let Ok(failed) = self.store.get_app(app_id).await {
                    self.notifier
                        .deploy_event(&failed, "failed", &e.to_string())
                        .await;
                }
                Err(e)
            }
        }
    }

    async fn image_deploy_inner(
        &self,
        app: &mut App,
        image: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        self.engine.pull_image(image).await?;
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }
        self.run_from_image(app, image).await
    }

    /// Restart: rebuild the container from the app's current image and
    /// config. No deployment record is appended.
    pub async fn restart(&self, app_id: &Uuid) -> Result<(), DeployError> {
        let mut app = self.store.get_app(app_id).await?;
        self.reject_mlx(&app)?;
        if app.image.is_empty() {
            return Err(DeployError::Validation(
                "app has no image to restart from".to_string(),
            ));
        }

        let image = app.image.clone();
        match self.run_from_image(&mut app, &image).await {
            Ok(()) => {
                app.status = AppStatus::Running;
                self.persist(&mut app).await?;
                self.install_app_routes(&app).await;
                self.record_activity(&app, "restart", "").await;
                Ok(())
            }
            Err(e) => {
                self.mark_failed(app_id).await;
                Err(e)
            }
        }
    }

    /// Rollback to a prior deployment record: the one named, or the
    /// second-most-recent.
    pub async fn rollback(
        &self,
        app_id: &Uuid,
        target_id: Option<Uuid>,
    ) -> Result<(), DeployError> {
        let mut app = self.store.get_app(app_id).await?;
        self.reject_mlx(&app)?;

        let target = match target_id {
            Some(id) => app
                .deployments
                .iter()
                .find(|d| d.id == id)
                .cloned()
                .ok_or_else(|| {
                    DeployError::Validation(format!("deployment {} not found", id))
                })?,
            None => app.deployments.get(1).cloned().ok_or_else(|| {
                DeployError::Validation("no previous deployment to roll back to".to_string())
            })?,
        };

        if target.image.is_empty() {
            return Err(DeployError::Validation(
                "target deployment has no image".to_string(),
            ));
        }

        let result = self.run_from_image(&mut app, &target.image).await;
        match result {
            Ok(()) => {
                let mut record = DeploymentRecord::new(&target.image, DeployOutcome::Success);
                record.commit_msg = format!("Rollback to {}", target.id);
                record.branch = target.branch.clone();
                app.status = AppStatus::Running;
                app.push_deployment(record);
                self.persist(&mut app).await?;
                self.install_app_routes(&app).await;
                self.record_activity(&app, "rollback", format!("to {}", target.id))
                    .await;
                Ok(())
            }
            Err(e) => {
                self.mark_failed(app_id).await;
                Err(e)
            }
        }
    }

    /// Stop the app's container and park it.
    pub async fn stop_app(&self, app_id: &Uuid) -> Result<(), DeployError> {
        let mut app = self.store.get_app(app_id).await?;

        for target in [app.container_id.clone().unwrap_or_default(), app.container_name()] {
            if target.is_empty() {
                continue;
            }
            match self.engine.stop_container(&target, self.config.stop_grace_secs).await {
                Ok(()) => break,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        app.status = AppStatus::Stopped;
        self.persist(&mut app).await?;
        self.record_activity(&app, "stop", "").await;
        Ok(())
    }

    /// Start a stopped app. Falls back to recreating the container when the
    /// engine no longer knows it.
    pub async fn start_app(&self, app_id: &Uuid) -> Result<(), DeployError> {
        let mut app = self.store.get_app(app_id).await?;
        self.reject_mlx(&app)?;

        let mut started = false;
        for target in [app.container_id.clone().unwrap_or_default(), app.container_name()] {
            if target.is_empty() {
                continue;
            }
            match self.engine.start_container(&target).await {
                Ok(()) => {
                    started = true;
                    break;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        if !started {
            if app.image.is_empty() {
                return Err(DeployError::Validation(
                    "app has no container and no image to start from".to_string(),
                ));
            }
            let image = app.image.clone();
            self.run_from_image(&mut app, &image).await?;
        }

        app.status = AppStatus::Running;
        self.persist(&mut app).await?;
        self.install_app_routes(&app).await;
        self.record_activity(&app, "start", "").await;
        Ok(())
    }

    /// Delete: tear down the container, every route, static content, and
    /// finally the App record itself.
    pub async fn delete_app(&self, app_id: &Uuid) -> Result<(), DeployError> {
        let app = self.store.get_app(app_id).await?;

        self.remove_prior_container(&app).await;
        self.remove_app_routes(&app).await;

        if app.app_type == AppType::Static {
            // Content may live under the app name or, for older apps,
            // under the domain.
            for dir in [
                self.config.static_dir(&app.name),
                self.config.static_dir(&app.domain),
            ] {
                if dir.exists() {
                    if let Err(e) = std::fs::remove_dir_all(&dir) {
                        tracing::warn!(path = %dir.display(), error = %e, "Static content removal failed");
                    }
                }
            }
        }

        self.record_activity(&app, "delete", "").await;
        self.store.delete_app(app_id).await?;
        Ok(())
    }

    /// Apply an updated App record: routes registered under old ids are
    /// removed before the new ones are installed.
    pub async fn apply_update(&self, old: &App, new: &mut App) -> Result<(), DeployError> {
        let renamed = old.name != new.name;
        let domain_changed = old.domain != new.domain;
        let aliases_changed = old.aliases != new.aliases;

        if renamed || domain_changed || aliases_changed {
            self.remove_app_routes(old).await;
        }

        self.persist(new).await?;

        if new.status == AppStatus::Running {
            self.install_app_routes(new).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::testutil::harness;
    use crate::ports::derive_host_port;
    use crate::routes::primary_route_id;
    use crate::store::AppStore;

    async fn seeded_app(h: &crate::deploy::testutil::Harness, name: &str) -> App {
        let mut app = App::new(name, AppType::Container);
        app.domain = format!("{}.example.com", name);
        h.store.insert_app(app.clone()).await.unwrap();
        app
    }

    #[tokio::test]
    async fn test_placeholder_deploy_runs_nginx_under_canonical_name() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let app = seeded_app(&h, "blog").await;

        h.deployer.placeholder_deploy(&app.id).await.unwrap();

        assert_eq!(h.engine.pulled_images().await, vec!["nginx:alpine"]);
        let container = h.engine.container_by_name("basepod-blog").await.unwrap();
        assert!(container.running);

        let stored = h.store.get_app(&app.id).await.unwrap();
        assert_eq!(stored.status, AppStatus::Running);
        assert_eq!(stored.container_id.as_deref(), Some(container.id.as_str()));
        assert_eq!(stored.ports.host_port, derive_host_port(&app.id.to_string()));
        assert!(h.routes.contains(&primary_route_id("blog")));
    }

    #[tokio::test]
    async fn test_image_deploy_failure_marks_app_failed() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let app = seeded_app(&h, "api").await;
        h.engine.fail_pulls().await;

        let err = h
            .deployer
            .image_deploy(&app.id, Some("ghcr.io/x/api:1".to_string()), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Engine(_)));

        let stored = h.store.get_app(&app.id).await.unwrap();
        assert_eq!(stored.status, AppStatus::Failed);
    }

    #[tokio::test]
    async fn test_image_deploy_appends_record_and_keeps_port() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let app = seeded_app(&h, "api").await;

        h.deployer
            .image_deploy(&app.id, Some("ghcr.io/x/api:1".to_string()), CancellationToken::new())
            .await
            .unwrap();
        let first = h.store.get_app(&app.id).await.unwrap();
        let port = first.ports.host_port;
        assert_ne!(port, 0);
        assert_eq!(first.deployments.len(), 1);
        assert_eq!(first.deployments[0].image, "ghcr.io/x/api:1");

        h.deployer
            .image_deploy(&app.id, Some("ghcr.io/x/api:2".to_string()), CancellationToken::new())
            .await
            .unwrap();
        let second = h.store.get_app(&app.id).await.unwrap();
        // Host port is assigned exactly once
        assert_eq!(second.ports.host_port, port);
        assert_eq!(second.deployments.len(), 2);
        assert_eq!(second.deployments[0].image, "ghcr.io/x/api:2");
    }

    #[tokio::test]
    async fn test_rollback_uses_second_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let mut app = seeded_app(&h, "x").await;

        let older = DeploymentRecord::new("basepod/x@sha1", DeployOutcome::Success);
        let older_id = older.id;
        app.push_deployment(older);
        app.push_deployment(DeploymentRecord::new("basepod/x:latest", DeployOutcome::Success));
        h.store.update_app(app.clone()).await.unwrap();

        h.deployer.rollback(&app.id, None).await.unwrap();

        let stored = h.store.get_app(&app.id).await.unwrap();
        assert_eq!(stored.image, "basepod/x@sha1");
        assert_eq!(stored.deployments[0].image, "basepod/x@sha1");
        assert_eq!(
            stored.deployments[0].commit_msg,
            format!("Rollback to {}", older_id)
        );
        assert!(stored.deployments.len() <= crate::apps::MAX_DEPLOY_HISTORY);
        let container = h.engine.container_by_name("basepod-x").await.unwrap();
        assert_eq!(container.opts.image, "basepod/x@sha1");
    }

    #[tokio::test]
    async fn test_rollback_without_history_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let app = seeded_app(&h, "solo").await;

        let err = h.deployer.rollback(&app.id, None).await.unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)));
    }

    #[tokio::test]
    async fn test_restart_replaces_container() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let app = seeded_app(&h, "svc").await;
        h.deployer
            .image_deploy(&app.id, Some("img:1".to_string()), CancellationToken::new())
            .await
            .unwrap();
        let before = h.store.get_app(&app.id).await.unwrap();
        let history_before = before.deployments.len();

        h.deployer.restart(&app.id).await.unwrap();

        let after = h.store.get_app(&app.id).await.unwrap();
        assert_ne!(after.container_id, before.container_id);
        assert_eq!(after.status, AppStatus::Running);
        // No record for restarts
        assert_eq!(after.deployments.len(), history_before);
    }

    #[tokio::test]
    async fn test_delete_cleans_routes_and_static_content() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let mut app = App::new("site", AppType::Static);
        app.domain = "d1.example.com".to_string();
        app.aliases = vec!["a1.example.com".to_string(), "a2.example.com".to_string()];
        app.status = AppStatus::Running;
        h.store.insert_app(app.clone()).await.unwrap();

        let content = h.config.static_dir("site");
        std::fs::create_dir_all(&content).unwrap();
        std::fs::write(content.join("index.html"), "<html/>").unwrap();

        h.deployer.install_app_routes(&app).await;
        assert!(h.routes.contains("static-d1.example.com"));

        h.deployer.delete_app(&app.id).await.unwrap();

        assert!(!h.routes.contains("static-d1.example.com"));
        let prefix = app.id_prefix();
        assert!(!h.routes.contains(&format!("alias-{}-a1.example.com", prefix)));
        assert!(!content.exists());
        assert!(h.store.get_app(&app.id).await.is_err());
    }

    #[tokio::test]
    async fn test_mlx_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let app = App::new("ml", AppType::Mlx);
        h.store.insert_app(app.clone()).await.unwrap();

        let err = h.deployer.placeholder_deploy(&app.id).await.unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)));
    }

    #[tokio::test]
    async fn test_apply_update_swaps_alias_routes() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let mut app = seeded_app(&h, "shop").await;
        app.status = AppStatus::Running;
        app.ports.host_port = 10101;
        app.aliases = vec!["old.example.com".to_string()];
        h.store.update_app(app.clone()).await.unwrap();
        h.deployer.install_app_routes(&app).await;

        let prefix = app.id_prefix();
        assert!(h.routes.contains(&format!("alias-{}-old.example.com", prefix)));

        let old = app.clone();
        let mut new = app.clone();
        new.aliases = vec!["new.example.com".to_string()];
        h.deployer.apply_update(&old, &mut new).await.unwrap();

        assert!(!h.routes.contains(&format!("alias-{}-old.example.com", prefix)));
        assert!(h.routes.contains(&format!("alias-{}-new.example.com", prefix)));
    }
}
