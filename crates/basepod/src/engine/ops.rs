//! Engine trait — abstract interface over the container engine.
//!
//! Every consumer (pipeline, controllers, API) goes through this trait.
//! `live.rs` provides the bollard-backed implementation; `fake.rs` provides
//! a test double. Implementations must be `Send + Sync` so they can live
//! inside the shared state as `Arc<dyn EngineOps>`.

use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::client::EngineError;

/// One published port for a container create.
#[derive(Debug, Clone)]
pub struct PortPublish {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: String,
    /// Bind on all interfaces; loopback only otherwise.
    pub external: bool,
}

/// Options for `create_container`. The adapter attaches the container to the
/// shared `basepod` network and applies the `basepod.app` labels itself.
#[derive(Debug, Clone, Default)]
pub struct CreateContainerOpts {
    pub name: String,
    pub image: String,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    /// Bind strings, `volume-or-host-path:container-path`.
    pub volumes: Vec<String>,
    pub ports: Vec<PortPublish>,
    pub labels: HashMap<String, String>,
    /// Zero means unlimited.
    pub memory_bytes: i64,
    /// Zero means unlimited.
    pub cpus: f64,
    pub command: Option<Vec<String>>,
}

/// Normalized container view used by the pipeline and API.
#[derive(Debug, Clone)]
pub struct ContainerDetails {
    pub id: String,
    /// Without the leading slash.
    pub name: String,
    pub image: String,
    pub state: String,
    pub labels: HashMap<String, String>,
}

/// A single raw log chunk from the engine, stream-tagged.
#[derive(Debug, Clone)]
pub struct LogChunk {
    pub stderr: bool,
    pub data: Bytes,
}

/// Normalized image view.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ImageDetails {
    pub id: String,
    pub tags: Vec<String>,
    pub size: i64,
}

/// One stats sample, already reduced to the fields we persist.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSample {
    pub cpu_percent: f64,
    pub mem_usage: u64,
    pub mem_limit: u64,
    pub net_in: u64,
    pub net_out: u64,
}

#[derive(Debug, Clone)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub tty: bool,
    pub attach_stdin: bool,
}

/// An attached exec session: output stream plus stdin sink.
pub struct ExecSession {
    pub output: Pin<Box<dyn futures_util::Stream<Item = Result<LogChunk, EngineError>> + Send>>,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecStatus {
    pub running: bool,
    pub exit_code: Option<i64>,
}

#[async_trait]
pub trait EngineOps: Send + Sync {
    async fn ping(&self) -> Result<(), EngineError>;

    // ── Images ──────────────────────────────────────────────────

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError>;

    /// Build an image from a context directory, streaming build output lines
    /// into `lines`. Cancellation aborts the build stream.
    async fn build_image(
        &self,
        context_dir: &Path,
        dockerfile: &str,
        tag: &str,
        lines: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), EngineError>;

    async fn list_images(&self) -> Result<Vec<ImageDetails>, EngineError>;

    async fn remove_image(&self, reference: &str, force: bool) -> Result<(), EngineError>;

    // ── Container lifecycle ─────────────────────────────────────

    async fn create_container(&self, opts: CreateContainerOpts) -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    async fn stop_container(&self, id: &str, grace_secs: u32) -> Result<(), EngineError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError>;

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerDetails>, EngineError>;

    // ── Observation ─────────────────────────────────────────────

    /// Recent log chunks, newest `tail` lines, stdout and stderr.
    async fn container_logs(&self, id: &str, tail: u32) -> Result<Vec<LogChunk>, EngineError>;

    /// One stats snapshot.
    async fn container_stats(&self, id: &str) -> Result<StatsSample, EngineError>;

    // ── Exec ────────────────────────────────────────────────────

    async fn exec_create(&self, container_id: &str, spec: ExecSpec) -> Result<String, EngineError>;

    async fn exec_start(&self, exec_id: &str, tty: bool) -> Result<ExecSession, EngineError>;

    async fn exec_resize(&self, exec_id: &str, cols: u16, rows: u16) -> Result<(), EngineError>;

    async fn exec_inspect(&self, exec_id: &str) -> Result<ExecStatus, EngineError>;

    // ── Host resources ──────────────────────────────────────────

    async fn ensure_network(&self, name: &str) -> Result<(), EngineError>;

    async fn list_volumes(&self) -> Result<Vec<String>, EngineError>;
}
