use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasepodConfig {
    pub bind_address: String,
    /// Root domain apps are parked under (`<app>.<root_domain>`).
    pub root_domain: String,
    /// Subdomain serving the dashboard / API (`d.<root_domain>` by default).
    pub dashboard_subdomain: String,
    /// Base directory for builds, static app content, and logs.
    pub base_dir: PathBuf,
    /// Docker socket path. Empty string means bollard defaults.
    pub docker_socket: String,
    pub caddy_admin_url: String,
    /// Name of the Caddy HTTP server whose route list we manage.
    pub caddy_server_name: String,
    pub health_tick_secs: u64,
    pub metrics_tick_secs: u64,
    pub metrics_retention_days: i64,
    /// Grace period passed to container stop.
    pub stop_grace_secs: u32,
}

impl BasepodConfig {
    /// Resolve the effective configuration: a TOML file when one exists,
    /// env vars otherwise, with a handful of env vars always winning so a
    /// deployment can repoint sockets and domains without editing the file.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = std::env::var("BASEPOD_CONFIG_FILE")
            .unwrap_or_else(|_| "/etc/basepod/basepod.toml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!(path = %config_path, "Reading config file");
            Self::from_file(&config_path)?
        } else {
            tracing::info!(path = %config_path, "No config file, falling back to env vars");
            Self::from_env()
        };

        // These env vars beat the file unconditionally.
        if let Ok(bind) = std::env::var("BASEPOD_BIND") {
            config.bind_address = bind;
        }
        if let Ok(root) = std::env::var("BASEPOD_ROOT_DOMAIN") {
            config.root_domain = root;
        }
        if let Ok(base) = std::env::var("BASEPOD_BASE_DIR") {
            config.base_dir = PathBuf::from(base);
        }
        if let Ok(socket) = std::env::var("DOCKER_SOCKET") {
            config.docker_socket = socket;
        }
        if let Ok(admin) = std::env::var("CADDY_ADMIN_URL") {
            config.caddy_admin_url = admin;
        }

        Ok(config)
    }

    /// Parse a TOML config file. Missing keys take their defaults.
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: std::env::var("BASEPOD_BIND")
                .unwrap_or(defaults.bind_address),
            root_domain: std::env::var("BASEPOD_ROOT_DOMAIN")
                .unwrap_or(defaults.root_domain),
            dashboard_subdomain: std::env::var("BASEPOD_DASHBOARD_SUBDOMAIN")
                .unwrap_or(defaults.dashboard_subdomain),
            base_dir: std::env::var("BASEPOD_BASE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.base_dir),
            docker_socket: std::env::var("DOCKER_SOCKET")
                .unwrap_or(defaults.docker_socket),
            caddy_admin_url: std::env::var("CADDY_ADMIN_URL")
                .unwrap_or(defaults.caddy_admin_url),
            caddy_server_name: std::env::var("CADDY_SERVER_NAME")
                .unwrap_or(defaults.caddy_server_name),
            health_tick_secs: std::env::var("BASEPOD_HEALTH_TICK_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.health_tick_secs),
            metrics_tick_secs: std::env::var("BASEPOD_METRICS_TICK_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.metrics_tick_secs),
            metrics_retention_days: std::env::var("BASEPOD_METRICS_RETENTION_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.metrics_retention_days),
            stop_grace_secs: std::env::var("BASEPOD_STOP_GRACE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.stop_grace_secs),
        }
    }

    /// Validate configuration values. Fast, no I/O.
    pub fn validate(&self) -> Result<(), String> {
        if self.bind_address.is_empty() {
            return Err("bind_address must not be empty".to_string());
        }
        if self.root_domain.is_empty() {
            return Err("root_domain must not be empty".to_string());
        }
        if self.base_dir.as_os_str().is_empty() {
            return Err("base_dir must not be empty".to_string());
        }
        if self.caddy_admin_url.is_empty() {
            return Err("caddy_admin_url must not be empty".to_string());
        }
        if self.health_tick_secs == 0 {
            return Err("health_tick_secs must be > 0".to_string());
        }
        if self.metrics_tick_secs == 0 {
            return Err("metrics_tick_secs must be > 0".to_string());
        }
        if self.metrics_retention_days <= 0 {
            return Err("metrics_retention_days must be > 0".to_string());
        }
        Ok(())
    }

    /// The full dashboard host, e.g. `d.example.com`.
    pub fn dashboard_host(&self) -> String {
        format!("{}.{}", self.dashboard_subdomain, self.root_domain)
    }

    /// Transient build workspace for one app.
    pub fn build_dir(&self, app_id: &uuid::Uuid) -> PathBuf {
        self.base_dir.join("builds").join(app_id.to_string())
    }

    /// Document root for a static app.
    pub fn static_dir(&self, app_name: &str) -> PathBuf {
        self.base_dir.join("data").join("apps").join(app_name)
    }
}

impl Default for BasepodConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3030".to_string(),
            root_domain: "localhost".to_string(),
            dashboard_subdomain: "d".to_string(),
            base_dir: PathBuf::from("/var/lib/basepod"),
            docker_socket: "".to_string(),
            caddy_admin_url: "http://127.0.0.1:2019".to_string(),
            caddy_server_name: "srv0".to_string(),
            health_tick_secs: 10,
            metrics_tick_secs: 30,
            metrics_retention_days: 7,
            stop_grace_secs: 10,
        }
    }
}
