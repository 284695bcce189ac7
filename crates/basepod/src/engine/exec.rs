//! Exec domain — create, start, resize, inspect.

use futures_util::stream::StreamExt;

use super::client::{DockerEngine, EngineError};
use super::container::log_output_to_chunk;
use super::ops::{ExecSession, ExecSpec, ExecStatus};

impl DockerEngine {
    /// Create an exec instance in a container. Returns the exec id.
    pub async fn exec_create(
        &self,
        container_id: &str,
        spec: ExecSpec,
    ) -> Result<String, EngineError> {
        use bollard::models::ExecConfig;

        let config = ExecConfig {
            attach_stdin: Some(spec.attach_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(spec.tty),
            cmd: Some(spec.cmd),
            ..Default::default()
        };

        let result = self
            .client
            .create_exec(container_id, config)
            .await
            .map_err(|e| EngineError::from_status(e, container_id))?;

        Ok(result.id)
    }

    /// Start an exec instance attached, yielding a duplex session.
    pub async fn exec_start(&self, exec_id: &str, tty: bool) -> Result<ExecSession, EngineError> {
        use bollard::exec::{StartExecOptions, StartExecResults};

        let options = Some(StartExecOptions {
            detach: false,
            tty,
            ..Default::default()
        });

        match self
            .client
            .start_exec(exec_id, options)
            .await
            .map_err(|e| EngineError::from_status(e, exec_id))?
        {
            StartExecResults::Attached { output, input } => {
                let mapped = output.map(|item| {
                    item.map(log_output_to_chunk)
                        .map_err(EngineError::Bollard)
                });
                Ok(ExecSession {
                    output: Box::pin(mapped),
                    input,
                })
            }
            StartExecResults::Detached => Err(EngineError::ExecFailed(
                "exec unexpectedly started detached".to_string(),
            )),
        }
    }

    /// Resize the TTY of an exec instance.
    pub async fn exec_resize(
        &self,
        exec_id: &str,
        cols: u16,
        rows: u16,
    ) -> Result<(), EngineError> {
        use bollard::exec::ResizeExecOptions;

        let options = ResizeExecOptions {
            height: rows,
            width: cols,
        };

        self.client
            .resize_exec(exec_id, options)
            .await
            .map_err(|e| EngineError::from_status(e, exec_id))
    }

    /// Inspect an exec instance for its running flag and exit code.
    pub async fn exec_inspect(&self, exec_id: &str) -> Result<ExecStatus, EngineError> {
        let response = self
            .client
            .inspect_exec(exec_id)
            .await
            .map_err(|e| EngineError::from_status(e, exec_id))?;

        Ok(ExecStatus {
            running: response.running.unwrap_or(false),
            exit_code: response.exit_code,
        })
    }
}
