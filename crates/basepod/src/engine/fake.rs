//! Fake — test double for engine operations.
//!
//! Provides a deterministic [`FakeEngine`] that implements [`EngineOps`]
//! using in-memory state. Useful for unit-testing the pipeline and
//! controllers without a running daemon.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::client::EngineError;
use super::ops::{
    ContainerDetails, CreateContainerOpts, EngineOps, ExecSession, ExecSpec, ExecStatus,
    ImageDetails, LogChunk, StatsSample,
};

/// A container in the fake store.
#[derive(Clone, Debug)]
pub struct FakeContainer {
    pub id: String,
    pub opts: CreateContainerOpts,
    pub running: bool,
}

#[derive(Default)]
struct Inner {
    containers: HashMap<String, FakeContainer>,
    pulled: Vec<String>,
    built: Vec<String>,
    removed: Vec<String>,
    networks: Vec<String>,
    volumes: Vec<String>,
    execs: HashMap<String, ExecSpec>,
    next_id: u64,
    fail_pulls: bool,
    fail_builds: bool,
    fail_starts: bool,
    stats: StatsSample,
    exec_output: Vec<u8>,
    exec_exit_code: i64,
}

/// A fake engine for deterministic testing.
pub struct FakeEngine {
    inner: Mutex<Inner>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                exec_exit_code: 0,
                ..Inner::default()
            }),
        }
    }

    pub async fn fail_pulls(&self) {
        self.inner.lock().await.fail_pulls = true;
    }

    pub async fn fail_builds(&self) {
        self.inner.lock().await.fail_builds = true;
    }

    pub async fn fail_starts(&self) {
        self.inner.lock().await.fail_starts = true;
    }

    pub async fn set_stats(&self, sample: StatsSample) {
        self.inner.lock().await.stats = sample;
    }

    pub async fn set_exec_result(&self, output: &[u8], exit_code: i64) {
        let mut state = self.inner.lock().await;
        state.exec_output = output.to_vec();
        state.exec_exit_code = exit_code;
    }

    pub async fn pulled_images(&self) -> Vec<String> {
        self.inner.lock().await.pulled.clone()
    }

    pub async fn built_tags(&self) -> Vec<String> {
        self.inner.lock().await.built.clone()
    }

    pub async fn removed_containers(&self) -> Vec<String> {
        self.inner.lock().await.removed.clone()
    }

    pub async fn container_by_name(&self, name: &str) -> Option<FakeContainer> {
        self.inner
            .lock()
            .await
            .containers
            .values()
            .find(|c| c.opts.name == name)
            .cloned()
    }

    pub async fn container_count(&self) -> usize {
        self.inner.lock().await.containers.len()
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve<'a>(state: &'a Inner, id_or_name: &str) -> Option<&'a FakeContainer> {
    state
        .containers
        .get(id_or_name)
        .or_else(|| state.containers.values().find(|c| c.opts.name == id_or_name))
}

fn details(container: &FakeContainer) -> ContainerDetails {
    ContainerDetails {
        id: container.id.clone(),
        name: container.opts.name.clone(),
        image: container.opts.image.clone(),
        state: if container.running {
            "running".to_string()
        } else {
            "exited".to_string()
        },
        labels: container.opts.labels.clone(),
    }
}

#[async_trait]
impl EngineOps for FakeEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        if state.fail_pulls {
            return Err(EngineError::Bollard(
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 500,
                    message: format!("pull failed: {}", reference),
                },
            ));
        }
        state.pulled.push(reference.to_string());
        Ok(())
    }

    async fn build_image(
        &self,
        _context_dir: &Path,
        _dockerfile: &str,
        tag: &str,
        lines: mpsc::Sender<String>,
        _cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        if state.fail_builds {
            let _ = lines.send("ERROR: build exploded".to_string()).await;
            return Err(EngineError::BuildFailed("build exploded".to_string()));
        }
        let _ = lines.send(format!("Step 1/2 : building {}", tag)).await;
        let _ = lines.send(format!("Successfully tagged {}", tag)).await;
        state.built.push(tag.to_string());
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<ImageDetails>, EngineError> {
        let state = self.inner.lock().await;
        Ok(state
            .pulled
            .iter()
            .chain(state.built.iter())
            .enumerate()
            .map(|(i, tag)| ImageDetails {
                id: format!("sha256:fake{:04}", i),
                tags: vec![tag.clone()],
                size: 0,
            })
            .collect())
    }

    async fn remove_image(&self, _reference: &str, _force: bool) -> Result<(), EngineError> {
        Ok(())
    }

    async fn create_container(&self, opts: CreateContainerOpts) -> Result<String, EngineError> {
        let mut state = self.inner.lock().await;
        if state.containers.values().any(|c| c.opts.name == opts.name) {
            return Err(EngineError::Conflict(format!(
                "container name {} already in use",
                opts.name
            )));
        }
        state.next_id += 1;
        let id = format!("ctr-{:08}", state.next_id);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                opts,
                running: false,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        if state.fail_starts {
            return Err(EngineError::Bollard(
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 500,
                    message: "start failed".to_string(),
                },
            ));
        }
        let key = resolve(&state, id)
            .map(|c| c.id.clone())
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        state.containers.get_mut(&key).unwrap().running = true;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace_secs: u32) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        let key = resolve(&state, id)
            .map(|c| c.id.clone())
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        state.containers.get_mut(&key).unwrap().running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        let key = resolve(&state, id)
            .map(|c| c.id.clone())
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        state.containers.remove(&key);
        state.removed.push(key);
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError> {
        let state = self.inner.lock().await;
        resolve(&state, id)
            .map(details)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerDetails>, EngineError> {
        let state = self.inner.lock().await;
        Ok(state
            .containers
            .values()
            .filter(|c| all || c.running)
            .map(details)
            .collect())
    }

    async fn container_logs(&self, id: &str, _tail: u32) -> Result<Vec<LogChunk>, EngineError> {
        let state = self.inner.lock().await;
        resolve(&state, id).ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        Ok(vec![LogChunk {
            stderr: false,
            data: Bytes::from_static(b"fake log line\n"),
        }])
    }

    async fn container_stats(&self, id: &str) -> Result<StatsSample, EngineError> {
        let state = self.inner.lock().await;
        resolve(&state, id).ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        Ok(state.stats)
    }

    async fn exec_create(&self, container_id: &str, spec: ExecSpec) -> Result<String, EngineError> {
        let mut state = self.inner.lock().await;
        resolve(&state, container_id)
            .ok_or_else(|| EngineError::NotFound(container_id.to_string()))?;
        let exec_id = format!("exec-{}", state.execs.len() + 1);
        state.execs.insert(exec_id.clone(), spec);
        Ok(exec_id)
    }

    async fn exec_start(&self, exec_id: &str, _tty: bool) -> Result<ExecSession, EngineError> {
        let state = self.inner.lock().await;
        if !state.execs.contains_key(exec_id) {
            return Err(EngineError::NotFound(exec_id.to_string()));
        }
        let chunk = LogChunk {
            stderr: false,
            data: Bytes::copy_from_slice(&state.exec_output),
        };
        Ok(ExecSession {
            output: Box::pin(futures_util::stream::iter(vec![Ok(chunk)])),
            input: Box::pin(tokio::io::sink()),
        })
    }

    async fn exec_resize(&self, _exec_id: &str, _cols: u16, _rows: u16) -> Result<(), EngineError> {
        Ok(())
    }

    async fn exec_inspect(&self, exec_id: &str) -> Result<ExecStatus, EngineError> {
        let state = self.inner.lock().await;
        if !state.execs.contains_key(exec_id) {
            return Err(EngineError::NotFound(exec_id.to_string()));
        }
        Ok(ExecStatus {
            running: false,
            exit_code: Some(state.exec_exit_code),
        })
    }

    async fn ensure_network(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        if !state.networks.iter().any(|n| n == name) {
            state.networks.push(name.to_string());
        }
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.inner.lock().await.volumes.clone())
    }
}
