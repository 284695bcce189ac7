//! Template flows — one-click deploys from the built-in catalog.
//!
//! Identical to an image deploy except image, port, env defaults, and named
//! volumes come from the template descriptor. Database templates get
//! generated credentials when the standard env keys are blank.

use rand::RngCore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::apps::{AppStatus, DeployOutcome, DeploymentRecord, VolumeMount};

use super::{DeployError, Deployer};

pub struct TemplateSpec {
    pub name: &'static str,
    pub image: &'static str,
    pub container_port: u16,
    /// Env defaults; applied only where the app has no value.
    pub env: &'static [(&'static str, &'static str)],
    /// Env keys that receive generated credentials when blank.
    pub credential_keys: &'static [&'static str],
    /// Logical volume name → container path.
    pub volumes: &'static [(&'static str, &'static str)],
    /// Env key rewritten to `http://<domain>` (Ghost-style apps).
    pub url_env: Option<&'static str>,
}

pub const TEMPLATES: &[TemplateSpec] = &[
    TemplateSpec {
        name: "postgres",
        image: "postgres:16-alpine",
        container_port: 5432,
        env: &[("POSTGRES_USER", "basepod"), ("POSTGRES_DB", "basepod")],
        credential_keys: &["POSTGRES_PASSWORD"],
        volumes: &[("data", "/var/lib/postgresql/data")],
        url_env: None,
    },
    TemplateSpec {
        name: "mysql",
        image: "mysql:8",
        container_port: 3306,
        env: &[("MYSQL_DATABASE", "basepod")],
        credential_keys: &["MYSQL_ROOT_PASSWORD"],
        volumes: &[("data", "/var/lib/mysql")],
        url_env: None,
    },
    TemplateSpec {
        name: "redis",
        image: "redis:7-alpine",
        container_port: 6379,
        env: &[],
        credential_keys: &[],
        volumes: &[("data", "/data")],
        url_env: None,
    },
    TemplateSpec {
        name: "mongodb",
        image: "mongo:7",
        container_port: 27017,
        env: &[("MONGO_INITDB_ROOT_USERNAME", "basepod")],
        credential_keys: &["MONGO_INITDB_ROOT_PASSWORD"],
        volumes: &[("data", "/data/db")],
        url_env: None,
    },
    TemplateSpec {
        name: "ghost",
        image: "ghost:5-alpine",
        container_port: 2368,
        env: &[],
        credential_keys: &[],
        volumes: &[("content", "/var/lib/ghost/content")],
        url_env: Some("url"),
    },
];

pub fn find_template(name: &str) -> Option<&'static TemplateSpec> {
    TEMPLATES.iter().find(|t| t.name == name)
}

/// 24 random bytes, hex-encoded.
fn generate_credential() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl Deployer {
    /// Deploy an app from a catalog template.
    pub async fn template_deploy(
        &self,
        app_id: &Uuid,
        template_name: &str,
        cancel: CancellationToken,
    ) -> Result<(), DeployError> {
        let template = find_template(template_name).ok_or_else(|| {
            DeployError::Validation(format!("unknown template '{}'", template_name))
        })?;

        let mut app = self.store.get_app(app_id).await?;
        self.reject_mlx(&app)?;

        app.ports.container_port = template.container_port;
        for (key, value) in template.env {
            app.env
                .entry((*key).to_string())
                .or_insert_with(|| (*value).to_string());
        }
        for key in template.credential_keys {
            let slot = app.env.entry((*key).to_string()).or_default();
            if slot.is_empty() {
                *slot = generate_credential();
            }
        }
        if let Some(url_key) = template.url_env {
            if !app.domain.is_empty() {
                app.env
                    .insert(url_key.to_string(), format!("http://{}", app.domain));
            }
        }
        for (logical, path) in template.volumes {
            if !app.volumes.iter().any(|v| v.name == *logical) {
                app.volumes.push(VolumeMount {
                    name: (*logical).to_string(),
                    container_path: (*path).to_string(),
                    host_path: None,
                });
            }
        }

        app.status = AppStatus::Deploying;
        self.persist(&mut app).await?;

        let result = async {
            self.engine.pull_image(template.image).await?;
            if cancel.is_cancelled() {
                return Err(DeployError::Cancelled);
            }
            self.run_from_image(&mut app, template.image).await
        }
        .await;

        match result {
            Ok(()) => {
                app.status = AppStatus::Running;
                app.push_deployment(DeploymentRecord::new(template.image, DeployOutcome::Success));
                self.persist(&mut app).await?;
                self.install_app_routes(&app).await;
                self.record_activity(&app, "deploy", format!("template {}", template.name))
                    .await;
                Ok(())
            }
            Err(e) => {
                self.mark_failed(app_id).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::{App, AppType};
    use crate::deploy::testutil::harness;
    use crate::store::AppStore;

    #[tokio::test]
    async fn test_unknown_template_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let app = App::new("db", AppType::Container);
        h.store.insert_app(app.clone()).await.unwrap();

        let err = h
            .deployer
            .template_deploy(&app.id, "oracle", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)));
    }

    #[tokio::test]
    async fn test_postgres_template_generates_credentials_and_volumes() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let app = App::new("db", AppType::Container);
        h.store.insert_app(app.clone()).await.unwrap();

        h.deployer
            .template_deploy(&app.id, "postgres", CancellationToken::new())
            .await
            .unwrap();

        let stored = h.store.get_app(&app.id).await.unwrap();
        assert_eq!(stored.image, "postgres:16-alpine");
        assert_eq!(stored.ports.container_port, 5432);
        assert_eq!(stored.env["POSTGRES_USER"], "basepod");
        // 24 bytes hex-encoded
        assert_eq!(stored.env["POSTGRES_PASSWORD"].len(), 48);

        let container = h.engine.container_by_name("basepod-db").await.unwrap();
        assert!(container
            .opts
            .volumes
            .iter()
            .any(|v| v == "basepod-db-data:/var/lib/postgresql/data"));
    }

    #[tokio::test]
    async fn test_existing_credential_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let mut app = App::new("db2", AppType::Container);
        app.env
            .insert("POSTGRES_PASSWORD".to_string(), "sekret".to_string());
        h.store.insert_app(app.clone()).await.unwrap();

        h.deployer
            .template_deploy(&app.id, "postgres", CancellationToken::new())
            .await
            .unwrap();

        let stored = h.store.get_app(&app.id).await.unwrap();
        assert_eq!(stored.env["POSTGRES_PASSWORD"], "sekret");
    }

    #[tokio::test]
    async fn test_ghost_url_rewritten_to_domain() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let mut app = App::new("blog", AppType::Container);
        app.domain = "blog.example.com".to_string();
        h.store.insert_app(app.clone()).await.unwrap();

        h.deployer
            .template_deploy(&app.id, "ghost", CancellationToken::new())
            .await
            .unwrap();

        let stored = h.store.get_app(&app.id).await.unwrap();
        assert_eq!(stored.env["url"], "http://blog.example.com");
    }

    #[test]
    fn test_generated_credential_shape() {
        let a = generate_credential();
        let b = generate_credential();
        assert_eq!(a.len(), 48);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
