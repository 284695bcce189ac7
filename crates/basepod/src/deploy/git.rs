//! Git flow — webhook-driven pull deploys.
//!
//! Shallow-clones the configured branch into the build workspace and joins
//! the source flow from the Dockerfile step onward. Unlike tarball pushes,
//! the build workspace is removed after a successful deploy.

use std::path::Path;
use std::process::Stdio;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::apps::{AppStatus, DeployOutcome, DeploymentRecord};

use super::manifest::{BuildSection, RepoManifest};
use super::{emit, DeployError, Deployer};

/// Commit metadata carried from the webhook into the deployment record.
#[derive(Debug, Clone, Default)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
    pub branch: String,
}

impl Deployer {
    /// Clone the app's repository and deploy it.
    pub async fn git_deploy(
        &self,
        app_id: &Uuid,
        commit: CommitInfo,
        log: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), DeployError> {
        let mut app = self.store.get_app(app_id).await?;
        self.reject_mlx(&app)?;

        if app.deploy.git_url.is_empty() {
            return Err(DeployError::Validation(
                "app has no git_url configured".to_string(),
            ));
        }

        app.status = AppStatus::Deploying;
        self.persist(&mut app).await?;

        let build_dir = self.config.build_dir(&app.id);
        let source_dir = build_dir.join("source");

        let result = self
            .git_deploy_inner(&mut app, &source_dir, &commit, &log, cancel)
            .await;

        match result {
            Ok(build_log) => {
                app.status = AppStatus::Running;
                let mut record = DeploymentRecord::new(&app.image_tag(), DeployOutcome::Success);
                record.commit_hash = commit.hash.clone();
                record.commit_msg = commit.message.clone();
                record.branch = commit.branch.clone();
                record.build_log = build_log;
                app.push_deployment(record);
                self.persist(&mut app).await?;
                self.install_app_routes(&app).await;
                self.record_activity(&app, "deploy", format!("git {}", commit.hash))
                    .await;
                self.notifier
                    .deploy_event(&app, "success", &app.image_tag())
                    .await;

                // Git builds clean their workspace up; tarball builds do not.
                if build_dir.exists() {
                    if let Err(e) = std::fs::remove_dir_all(&build_dir) {
                        tracing::warn!(path = %build_dir.display(), error = %e, "Build dir cleanup failed");
                    }
                }
                Ok(())
            }
            Err(e) => {
                emit(&log, format!("ERROR: {}", e)).await;
                // The webhook audit trail carries the error alongside the log.
                let mut record = DeploymentRecord::new(&app.image_tag(), DeployOutcome::Failed);
                record.commit_hash = commit.hash.clone();
                record.commit_msg = commit.message.clone();
                record.branch = commit.branch.clone();
                record.build_log = format!("ERROR: {}", e);
                app.push_deployment(record);
                app.status = AppStatus::Failed;
                let _ = self.persist(&mut app).await;
                self.notifier.deploy_event(&app, "failed", &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn git_deploy_inner(
        &self,
        app: &mut crate::apps::App,
        source_dir: &Path,
        commit: &CommitInfo,
        log: &mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<String, DeployError> {
        if source_dir.exists() {
            std::fs::remove_dir_all(source_dir)?;
        }
        if let Some(parent) = source_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let branch = if commit.branch.is_empty() {
            if app.deploy.branch.is_empty() {
                "main".to_string()
            } else {
                app.deploy.branch.clone()
            }
        } else {
            commit.branch.clone()
        };

        emit(log, format!("Cloning {} ({})", app.deploy.git_url, branch)).await;
        clone_repository(&app.deploy.git_url, &branch, source_dir, &cancel).await?;

        // Repo config may fill in dockerfile/port the app left empty.
        let mut build = BuildSection {
            dockerfile: app.deploy.dockerfile.clone(),
            context: String::new(),
        };
        if let Some(manifest) = RepoManifest::read_from(source_dir) {
            if build.dockerfile.is_empty() && !manifest.dockerfile.is_empty() {
                build.dockerfile = manifest.dockerfile;
            }
            if !manifest.context.is_empty() {
                build.context = manifest.context;
            }
            if app.ports.container_port == 0 && manifest.port != 0 {
                app.ports.container_port = manifest.port;
            }
        }

        self.build_and_start(app, source_dir, &build, log, cancel)
            .await
    }
}

/// `git clone --depth 1 --branch <branch> <url> <dir>`, killable on
/// cancellation. Stderr is surfaced on failure.
async fn clone_repository(
    url: &str,
    branch: &str,
    target: &Path,
    cancel: &CancellationToken,
) -> Result<(), DeployError> {
    let mut child = tokio::process::Command::new("git")
        .arg("clone")
        .arg("--depth")
        .arg("1")
        .arg("--branch")
        .arg(branch)
        .arg(url)
        .arg(target)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stderr = child.stderr.take();

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(DeployError::Cancelled);
        }
    };

    if !status.success() {
        let mut detail = String::new();
        if let Some(mut stderr) = stderr {
            use tokio::io::AsyncReadExt;
            let _ = stderr.read_to_string(&mut detail).await;
        }
        return Err(DeployError::Validation(format!(
            "git clone failed: {}",
            detail.trim()
        )));
    }
    Ok(())
}
