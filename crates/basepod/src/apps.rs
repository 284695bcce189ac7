//! App model — the user-declared unit of deployment.
//!
//! The App record is the single source of truth for desired state; container
//! existence is derived from it and reconciled by the deployment pipeline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deployment history is bounded; newest entry sits at index 0.
pub const MAX_DEPLOY_HISTORY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    Container,
    Static,
    /// Deprecated external-process variant. Kept for record compatibility;
    /// the pipeline rejects it.
    Mlx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Pending,
    Deploying,
    Building,
    Running,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Logical name; materialized as `basepod-<app>-<name>`.
    pub name: String,
    pub container_path: String,
    /// Host bind path. When unset a named volume is used.
    #[serde(default)]
    pub host_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub container_port: u16,
    /// Host port published for the app. Zero means "not yet assigned".
    pub host_port: u16,
    pub protocol: String,
    /// Bind the published port on all interfaces instead of loopback only.
    pub expose_external: bool,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            container_port: 8080,
            host_port: 0,
            protocol: "tcp".to_string(),
            expose_external: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub memory_mb: u64,
    pub cpus: f64,
    pub replicas: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 0,
            cpus: 0.0,
            replicas: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SslConfig {
    pub enabled: bool,
    pub auto_renew: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub git_url: String,
    pub branch: String,
    pub dockerfile: String,
    pub webhook_secret: String,
    pub auto_deploy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckSpec {
    pub endpoint: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub max_failures: u32,
    pub auto_restart: bool,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            endpoint: "/health".to_string(),
            interval_secs: 30,
            timeout_secs: 5,
            max_failures: 3,
            auto_restart: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployOutcome {
    Success,
    Failed,
}

/// One build+deploy attempt, appended to the owning App's bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: Uuid,
    pub image: String,
    pub commit_hash: String,
    pub commit_msg: String,
    pub branch: String,
    pub status: DeployOutcome,
    pub build_log: String,
    pub deployed_at: DateTime<Utc>,
}

impl DeploymentRecord {
    pub fn new(image: &str, status: DeployOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            image: image.to_string(),
            commit_hash: String::new(),
            commit_msg: String::new(),
            branch: String::new(),
            status,
            build_log: String::new(),
            deployed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub id: Uuid,
    /// Unique slug across all apps.
    pub name: String,
    #[serde(rename = "type")]
    pub app_type: AppType,
    /// Desired image. For source deploys this is `basepod/<name>:latest`.
    pub image: String,
    pub env: HashMap<String, String>,
    pub volumes: Vec<VolumeMount>,
    pub ports: PortConfig,
    pub resources: ResourceLimits,
    pub ssl: SslConfig,
    /// Unique across apps. Empty means "no routing".
    pub domain: String,
    pub aliases: Vec<String>,
    pub deploy: DeployConfig,
    pub health_check: Option<HealthCheckSpec>,
    pub status: AppStatus,
    /// Newest first, trimmed to [`MAX_DEPLOY_HISTORY`] on insert.
    pub deployments: Vec<DeploymentRecord>,
    pub container_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl App {
    pub fn new(name: &str, app_type: AppType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            app_type,
            image: String::new(),
            env: HashMap::new(),
            volumes: Vec::new(),
            ports: PortConfig::default(),
            resources: ResourceLimits::default(),
            ssl: SslConfig::default(),
            domain: String::new(),
            aliases: Vec::new(),
            deploy: DeployConfig::default(),
            health_check: None,
            status: AppStatus::Pending,
            deployments: Vec::new(),
            container_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Canonical container name, used to reconcile container identity when
    /// the stored id is stale.
    pub fn container_name(&self) -> String {
        format!("basepod-{}", self.name)
    }

    /// Image tag produced by source builds.
    pub fn image_tag(&self) -> String {
        format!("basepod/{}:latest", self.name)
    }

    /// Named volume for a logical mount.
    pub fn volume_name(&self, logical: &str) -> String {
        format!("basepod-{}-{}", self.name, logical)
    }

    /// First eight characters of the app id, used in alias route ids.
    pub fn id_prefix(&self) -> String {
        self.id.to_string().chars().take(8).collect()
    }

    /// Prepend a deployment record and trim the history.
    pub fn push_deployment(&mut self, record: DeploymentRecord) {
        self.deployments.insert(0, record);
        self.deployments.truncate(MAX_DEPLOY_HISTORY);
    }

    /// Effective health-check settings, with defaults applied to zeroes.
    pub fn effective_health_check(&self) -> Option<HealthCheckSpec> {
        let spec = self.health_check.clone()?;
        let defaults = HealthCheckSpec::default();
        Some(HealthCheckSpec {
            endpoint: if spec.endpoint.is_empty() {
                defaults.endpoint
            } else {
                spec.endpoint
            },
            interval_secs: if spec.interval_secs == 0 {
                defaults.interval_secs
            } else {
                spec.interval_secs
            },
            timeout_secs: if spec.timeout_secs == 0 {
                defaults.timeout_secs
            } else {
                spec.timeout_secs
            },
            max_failures: if spec.max_failures == 0 {
                defaults.max_failures
            } else {
                spec.max_failures
            },
            auto_restart: spec.auto_restart,
        })
    }
}
