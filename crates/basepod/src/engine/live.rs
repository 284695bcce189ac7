//! Live engine — wires [`DockerEngine`]'s domain methods into [`EngineOps`].

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::client::{DockerEngine, EngineError};
use super::ops::{
    ContainerDetails, CreateContainerOpts, EngineOps, ExecSession, ExecSpec, ExecStatus,
    ImageDetails, LogChunk, StatsSample,
};

#[async_trait]
impl EngineOps for DockerEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        DockerEngine::ping(self).await
    }

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        DockerEngine::pull_image(self, reference).await
    }

    async fn build_image(
        &self,
        context_dir: &Path,
        dockerfile: &str,
        tag: &str,
        lines: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        DockerEngine::build_image(self, context_dir, dockerfile, tag, lines, cancel).await
    }

    async fn list_images(&self) -> Result<Vec<ImageDetails>, EngineError> {
        DockerEngine::list_images(self).await
    }

    async fn remove_image(&self, reference: &str, force: bool) -> Result<(), EngineError> {
        DockerEngine::remove_image(self, reference, force).await
    }

    async fn create_container(&self, opts: CreateContainerOpts) -> Result<String, EngineError> {
        DockerEngine::create_container(self, opts).await
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        DockerEngine::start_container(self, id).await
    }

    async fn stop_container(&self, id: &str, grace_secs: u32) -> Result<(), EngineError> {
        DockerEngine::stop_container(self, id, grace_secs).await
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        DockerEngine::remove_container(self, id, force).await
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError> {
        DockerEngine::inspect_container(self, id).await
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerDetails>, EngineError> {
        DockerEngine::list_containers(self, all).await
    }

    async fn container_logs(&self, id: &str, tail: u32) -> Result<Vec<LogChunk>, EngineError> {
        DockerEngine::container_logs(self, id, tail).await
    }

    async fn container_stats(&self, id: &str) -> Result<StatsSample, EngineError> {
        DockerEngine::container_stats(self, id).await
    }

    async fn exec_create(&self, container_id: &str, spec: ExecSpec) -> Result<String, EngineError> {
        DockerEngine::exec_create(self, container_id, spec).await
    }

    async fn exec_start(&self, exec_id: &str, tty: bool) -> Result<ExecSession, EngineError> {
        DockerEngine::exec_start(self, exec_id, tty).await
    }

    async fn exec_resize(&self, exec_id: &str, cols: u16, rows: u16) -> Result<(), EngineError> {
        DockerEngine::exec_resize(self, exec_id, cols, rows).await
    }

    async fn exec_inspect(&self, exec_id: &str) -> Result<ExecStatus, EngineError> {
        DockerEngine::exec_inspect(self, exec_id).await
    }

    async fn ensure_network(&self, name: &str) -> Result<(), EngineError> {
        DockerEngine::ensure_network(self, name).await
    }

    async fn list_volumes(&self) -> Result<Vec<String>, EngineError> {
        DockerEngine::list_volumes(self).await
    }
}
