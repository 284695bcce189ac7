//! Engine client — core struct, constructor, error type.

use bollard::Docker;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Name conflict: {0}")]
    Conflict(String),
    #[error("Build failed: {0}")]
    BuildFailed(String),
    #[error("Exec failed: {0}")]
    ExecFailed(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Engine error: {0}")]
    Bollard(#[from] bollard::errors::Error),
}

impl EngineError {
    /// NotFound is non-fatal for stop/remove paths: "missing" means
    /// "already achieved".
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }

    /// Map a bollard server error to the typed variants the pipeline
    /// branches on.
    pub(super) fn from_status(err: bollard::errors::Error, subject: &str) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => EngineError::NotFound(subject.to_string()),
            bollard::errors::Error::DockerResponseServerError {
                status_code: 409,
                message,
            } => EngineError::Conflict(message),
            other => EngineError::Bollard(other),
        }
    }
}

/// Seconds before an idle daemon connection is considered dead.
const SOCKET_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct DockerEngine {
    /// Shared bollard handle; the container/image/exec modules reach it
    /// through `pub(super)`.
    pub(super) client: Docker,
}

impl DockerEngine {
    /// Connect to the daemon. An empty path means "wherever bollard would
    /// look on this platform"; otherwise the value is taken as a unix
    /// socket, with or without the `unix://` scheme.
    pub fn new(socket_path: &str) -> Result<Self, EngineError> {
        let client = match socket_path.strip_prefix("unix://").unwrap_or(socket_path) {
            "" => Docker::connect_with_defaults(),
            path => Docker::connect_with_socket(
                path,
                SOCKET_TIMEOUT_SECS,
                &bollard::API_DEFAULT_VERSION,
            ),
        }
        .map_err(|e| EngineError::ConnectionFailed(e.to_string()))?;
        Ok(DockerEngine { client })
    }

    /// Liveness probe against the daemon.
    pub async fn ping(&self) -> Result<(), EngineError> {
        self.client.ping().await.map_err(EngineError::from)?;
        Ok(())
    }

    /// Make sure the shared app network exists, creating it when missing.
    pub async fn ensure_network(&self, name: &str) -> Result<(), EngineError> {
        use bollard::models::NetworkCreateRequest;

        match self
            .client
            .inspect_network(
                name,
                None::<bollard::query_parameters::InspectNetworkOptions>,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                let config = NetworkCreateRequest {
                    name: name.to_string(),
                    driver: Some("bridge".to_string()),
                    ..Default::default()
                };
                self.client
                    .create_network(config)
                    .await
                    .map_err(EngineError::from)?;
                tracing::info!(network = name, "Created shared app network");
                Ok(())
            }
            Err(e) => Err(EngineError::from(e)),
        }
    }

    /// List volume names known to the engine.
    pub async fn list_volumes(&self) -> Result<Vec<String>, EngineError> {
        let response = self
            .client
            .list_volumes(None::<bollard::query_parameters::ListVolumesOptions>)
            .await
            .map_err(EngineError::from)?;
        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.name)
            .collect())
    }
}
