//! Source flow — tarball push deploys.
//!
//! The response is line-oriented: every step reports into the provided
//! channel and the HTTP layer streams it to the client. Static apps publish
//! their built assets straight to the document root; everything else is
//! built into `basepod/<name>:latest` and run.

use std::path::Path;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::apps::{App, AppStatus, AppType, DeployOutcome, DeploymentRecord};

use super::manifest::{parse_volume_strings, BuildSection, RepoManifest, SourceDeployConfig};
use super::{dockerfile, emit, DeployError, Deployer};

/// Default static publish directory inside a source tree.
const DEFAULT_PUBLIC_DIR: &str = "dist";

impl Deployer {
    /// Tarball source deploy. Returns the app id; progress and errors are
    /// reported as lines into `log`.
    pub async fn source_deploy(
        &self,
        config: SourceDeployConfig,
        tarball: Bytes,
        log: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<Uuid, DeployError> {
        if config.name.trim().is_empty() {
            return Err(DeployError::Validation("app name is required".to_string()));
        }
        if !is_valid_slug(&config.name) {
            return Err(DeployError::Validation(format!(
                "invalid app name '{}': lowercase letters, digits and dashes only",
                config.name
            )));
        }

        let app_id = self.upsert_source_app(&config).await?;

        match self
            .source_deploy_inner(&app_id, config, tarball, &log, cancel)
            .await
        {
            Ok(()) => {
                emit(&log, "Deploy complete!").await;
                Ok(app_id)
            }
            Err(e) => {
                emit(&log, format!("ERROR: {}", e)).await;
                self.mark_failed(&app_id).await;
                if let Ok(app) = self.store.get_app(&app_id).await {
                    self.notifier.deploy_event(&app, "failed", &e.to_string()).await;
                }
                Err(e)
            }
        }
    }

    /// Create the App on first push, or fold the new config into the
    /// existing record.
    async fn upsert_source_app(&self, config: &SourceDeployConfig) -> Result<Uuid, DeployError> {
        let (mut app, is_new) = match self.store.get_app_by_name(&config.name).await {
            Ok(app) => (app, false),
            Err(_) => (App::new(&config.name, AppType::Container), true),
        };

        self.reject_mlx(&app)?;

        if !config.domain.is_empty() {
            app.domain = config.domain.clone();
        } else if app.domain.is_empty() {
            app.domain = format!("{}.{}", app.name, self.config.root_domain);
        }
        if config.port != 0 {
            app.ports.container_port = config.port;
        } else if app.ports.container_port == 0 {
            app.ports.container_port = 8080;
        }
        for (key, value) in &config.env {
            app.env.insert(key.clone(), value.clone());
        }
        if !config.volumes.is_empty() {
            app.volumes = parse_volume_strings(&config.volumes);
        }
        if !config.git_branch.is_empty() {
            app.deploy.branch = config.git_branch.clone();
        }

        if is_new {
            self.store.insert_app(app.clone()).await?;
        } else {
            self.store.update_app(app.clone()).await?;
        }
        Ok(app.id)
    }

    async fn source_deploy_inner(
        &self,
        app_id: &Uuid,
        mut config: SourceDeployConfig,
        tarball: Bytes,
        log: &mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), DeployError> {
        let mut app = self.store.get_app(app_id).await?;

        // Unpack the upload into the build workspace.
        let build_dir = self.config.build_dir(&app.id);
        let source_dir = build_dir.join("source");
        if source_dir.exists() {
            std::fs::remove_dir_all(&source_dir)?;
        }
        std::fs::create_dir_all(&build_dir)?;
        std::fs::write(build_dir.join("source.tar.gz"), &tarball)?;

        emit(log, "Extracting source...").await;
        extract_tarball(&tarball, &source_dir)?;

        // Repo-level config fills whatever the push left blank.
        if let Some(manifest) = RepoManifest::read_from(&source_dir) {
            emit(log, "Found basepod.yaml").await;
            config.merge_manifest(&manifest);
        }
        if config.port != 0 {
            app.ports.container_port = config.port;
        }

        if config.app_type == "static" {
            return self.publish_static(&mut app, &config, &source_dir, log).await;
        }

        app.status = AppStatus::Building;
        self.persist(&mut app).await?;

        let build_log = self
            .build_and_start(&mut app, &source_dir, &config.build, log, cancel)
            .await?;

        app.status = AppStatus::Running;
        let mut record = DeploymentRecord::new(&app.image_tag(), DeployOutcome::Success);
        record.commit_hash = config.git_commit.clone();
        record.commit_msg = config.git_message.clone();
        record.branch = config.git_branch.clone();
        record.build_log = build_log;
        app.push_deployment(record);
        self.persist(&mut app).await?;
        self.install_app_routes(&app).await;
        self.record_activity(&app, "deploy", "source push").await;
        self.notifier.deploy_event(&app, "success", &app.image_tag()).await;
        Ok(())
    }

    /// Static publish: copy the built assets to the document root and
    /// register a file-serving route. No container is involved.
    async fn publish_static(
        &self,
        app: &mut App,
        config: &SourceDeployConfig,
        source_dir: &Path,
        log: &mpsc::Sender<String>,
    ) -> Result<(), DeployError> {
        let public = if config.public.is_empty() {
            DEFAULT_PUBLIC_DIR
        } else {
            &config.public
        };
        let public_dir = source_dir.join(public);
        if !public_dir.is_dir() {
            return Err(DeployError::Validation(format!(
                "static publish directory '{}' not found in source",
                public
            )));
        }

        let target = self.config.static_dir(&app.name);
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        copy_dir_all(&public_dir, &target)?;
        emit(log, format!("Published static content from '{}'", public)).await;

        app.app_type = AppType::Static;
        app.status = AppStatus::Running;
        app.push_deployment(DeploymentRecord::new("", DeployOutcome::Success));
        self.persist(app).await?;
        self.install_app_routes(app).await;
        self.record_activity(app, "deploy", "static publish").await;
        Ok(())
    }

    /// Shared container path for source and git deploys: ensure a
    /// Dockerfile, build the image, replace the container. Returns the
    /// accumulated build log.
    pub(crate) async fn build_and_start(
        &self,
        app: &mut App,
        source_dir: &Path,
        build: &BuildSection,
        log: &mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<String, DeployError> {
        let context_dir = if build.context.is_empty() {
            source_dir.to_path_buf()
        } else {
            source_dir.join(&build.context)
        };
        if !context_dir.is_dir() {
            return Err(DeployError::Validation(format!(
                "build context '{}' not found in source",
                build.context
            )));
        }

        let mut dockerfile_name = if build.dockerfile.is_empty() {
            "Dockerfile".to_string()
        } else {
            build.dockerfile.clone()
        };

        if !context_dir.join(&dockerfile_name).exists() {
            let stack = dockerfile::detect_stack(&context_dir).ok_or_else(|| {
                DeployError::Validation(
                    "no Dockerfile found and the stack could not be detected".to_string(),
                )
            })?;
            let rendered =
                dockerfile::generate_dockerfile(stack, &context_dir, app.ports.container_port);
            dockerfile_name = "Dockerfile".to_string();
            std::fs::write(context_dir.join(&dockerfile_name), rendered)?;
            emit(
                log,
                format!("Auto-generated Dockerfile for detected stack: {}", stack.name()),
            )
            .await;
        }

        let tag = app.image_tag();
        emit(log, format!("Building image {}", tag)).await;

        // Tee build output: forward each line to the caller while
        // accumulating it for the deployment record.
        let (tx, mut rx) = mpsc::channel::<String>(64);
        let forward = log.clone();
        let collector = tokio::spawn(async move {
            let mut acc = String::new();
            while let Some(line) = rx.recv().await {
                acc.push_str(&line);
                acc.push('\n');
                let _ = forward.send(line).await;
            }
            acc
        });

        let build_result = self
            .engine
            .build_image(&context_dir, &dockerfile_name, &tag, tx, cancel.clone())
            .await;
        let build_log = collector.await.unwrap_or_default();
        build_result?;

        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        emit(log, "Starting container...").await;
        self.run_from_image(app, &tag).await?;
        Ok(build_log)
    }
}

fn is_valid_slug(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

/// Unpack a gzipped tarball, refusing entries that escape the target.
fn extract_tarball(tarball: &[u8], target: &Path) -> Result<(), DeployError> {
    std::fs::create_dir_all(target)?;
    let decoder = flate2::read::GzDecoder::new(tarball);
    let mut archive = tar::Archive::new(decoder);
    archive.set_overwrite(true);
    archive
        .unpack(target)
        .map_err(|e| DeployError::Validation(format!("invalid source archive: {}", e)))?;
    Ok(())
}

fn copy_dir_all(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::testutil::harness;
    use crate::ports::derive_host_port;
    use crate::store::AppStore;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::collections::HashMap;
    use std::io::Write;

    /// Gzipped tarball of `(path, contents)` entries.
    fn make_tarball(files: &[(&str, &str)]) -> Bytes {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, contents.as_bytes())
                .unwrap();
        }
        let encoder = builder.into_inner().unwrap();
        Bytes::from(encoder.finish().unwrap())
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_node_app_tarball_deploy() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let tarball = make_tarball(&[
            ("package.json", r#"{"name":"blog","scripts":{"start":"node ."}}"#),
            ("index.js", "console.log('hi')"),
        ]);
        let mut env = HashMap::new();
        env.insert("NODE_ENV".to_string(), "production".to_string());
        let config = SourceDeployConfig {
            name: "blog".to_string(),
            port: 3000,
            env,
            ..Default::default()
        };

        let (tx, mut rx) = mpsc::channel(256);
        let app_id = h
            .deployer
            .source_deploy(config, tarball, tx, CancellationToken::new())
            .await
            .unwrap();

        let lines = drain(&mut rx);
        assert!(lines
            .iter()
            .any(|l| l.contains("Auto-generated Dockerfile for detected stack")));
        assert!(lines.iter().any(|l| l == "Deploy complete!"));

        let app = h.store.get_app(&app_id).await.unwrap();
        assert_eq!(app.status, AppStatus::Running);
        assert_eq!(app.image, "basepod/blog:latest");
        assert_eq!(app.domain, "blog.example.com");
        assert_eq!(app.ports.container_port, 3000);
        assert_eq!(app.ports.host_port, derive_host_port(&app.id.to_string()));
        assert_eq!(app.deployments.len(), 1);
        assert_eq!(app.deployments[0].status, DeployOutcome::Success);
        assert!(!app.deployments[0].build_log.is_empty());

        assert_eq!(h.engine.built_tags().await, vec!["basepod/blog:latest"]);
        assert!(h.routes.contains("basepod-blog"));

        // Tarball builds keep their workspace around
        assert!(h.config.build_dir(&app.id).join("source.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_static_deploy_publishes_and_routes() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let tarball = make_tarball(&[
            ("dist/index.html", "<h1>docs</h1>"),
            ("dist/app.css", "body{}"),
        ]);
        let config = SourceDeployConfig {
            name: "docs".to_string(),
            app_type: "static".to_string(),
            ..Default::default()
        };

        let (tx, _rx) = mpsc::channel(256);
        let app_id = h
            .deployer
            .source_deploy(config, tarball, tx, CancellationToken::new())
            .await
            .unwrap();

        let app = h.store.get_app(&app_id).await.unwrap();
        assert_eq!(app.app_type, AppType::Static);
        assert_eq!(app.status, AppStatus::Running);
        assert!(h.routes.contains("static-docs.example.com"));
        assert!(h.config.static_dir("docs").join("index.html").exists());
        // No container for static apps
        assert_eq!(h.engine.container_count().await, 0);
    }

    #[tokio::test]
    async fn test_manifest_fills_blank_fields() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let tarball = make_tarball(&[
            ("basepod.yaml", "port: 4000\ntype: static\npublic: out\n"),
            ("out/index.html", "<p>ok</p>"),
        ]);
        let config = SourceDeployConfig {
            name: "site".to_string(),
            ..Default::default()
        };

        let (tx, _rx) = mpsc::channel(256);
        let app_id = h
            .deployer
            .source_deploy(config, tarball, tx, CancellationToken::new())
            .await
            .unwrap();

        let app = h.store.get_app(&app_id).await.unwrap();
        assert_eq!(app.app_type, AppType::Static);
        assert!(h.config.static_dir("site").join("index.html").exists());
    }

    #[tokio::test]
    async fn test_build_failure_streams_error_and_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.engine.fail_builds().await;
        let tarball = make_tarball(&[("go.mod", "module x\n")]);
        let config = SourceDeployConfig {
            name: "broken".to_string(),
            ..Default::default()
        };

        let (tx, mut rx) = mpsc::channel(256);
        let err = h
            .deployer
            .source_deploy(config, tarball, tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Engine(_)));

        let lines = drain(&mut rx);
        assert!(lines.iter().any(|l| l.starts_with("ERROR: ")));

        let app = h.store.get_app_by_name("broken").await.unwrap();
        assert_eq!(app.status, AppStatus::Failed);
    }

    #[tokio::test]
    async fn test_invalid_name_rejected_without_state() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let config = SourceDeployConfig {
            name: "Bad Name!".to_string(),
            ..Default::default()
        };
        let (tx, _rx) = mpsc::channel(8);
        let err = h
            .deployer
            .source_deploy(config, make_tarball(&[]), tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)));
        assert!(h.store.list_apps().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_stack_without_dockerfile_fails() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let tarball = make_tarball(&[("README.md", "hello")]);
        let config = SourceDeployConfig {
            name: "mystery".to_string(),
            ..Default::default()
        };
        let (tx, _rx) = mpsc::channel(64);
        let err = h
            .deployer
            .source_deploy(config, tarball, tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)));
    }

    #[tokio::test]
    async fn test_redeploy_preserves_existing_domain_and_port() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let tarball = make_tarball(&[("package.json", "{}")]);
        let config = SourceDeployConfig {
            name: "keep".to_string(),
            domain: "keep.custom.io".to_string(),
            port: 3000,
            ..Default::default()
        };
        let (tx, _rx) = mpsc::channel(256);
        let app_id = h
            .deployer
            .source_deploy(config, tarball.clone(), tx, CancellationToken::new())
            .await
            .unwrap();
        let first = h.store.get_app(&app_id).await.unwrap();

        // Second push with no domain/port keeps the original values
        let config = SourceDeployConfig {
            name: "keep".to_string(),
            ..Default::default()
        };
        let (tx, _rx) = mpsc::channel(256);
        let again = h
            .deployer
            .source_deploy(config, tarball, tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(again, app_id);

        let second = h.store.get_app(&app_id).await.unwrap();
        assert_eq!(second.domain, "keep.custom.io");
        assert_eq!(second.ports.container_port, 3000);
        assert_eq!(second.ports.host_port, first.ports.host_port);
        assert_eq!(second.deployments.len(), 2);
    }

    #[test]
    fn test_slug_validation() {
        assert!(is_valid_slug("blog"));
        assert!(is_valid_slug("my-app-2"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("My-App"));
        assert!(!is_valid_slug("-edge"));
        assert!(!is_valid_slug("edge-"));
        assert!(!is_valid_slug("under_score"));
    }
}
