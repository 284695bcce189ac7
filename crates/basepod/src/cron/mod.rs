//! Cron executor — on-demand command runs inside an app's container.
//!
//! `run_job` creates a detached execution record immediately and finalizes
//! it in the background once the exec session ends. The stored `schedule`
//! string is opaque; nothing fires it on a timer.

use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::apps::AppStatus;
use crate::engine::{EngineError, EngineOps, ExecSpec};
use crate::store::{AppStore, CronExecution, ExecutionStatus, StoreError};

#[derive(Error, Debug)]
pub enum CronError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Output kept per execution; long-running jobs get truncated, not killed.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

pub struct CronRunner {
    store: Arc<dyn AppStore>,
    engine: Arc<dyn EngineOps>,
}

impl CronRunner {
    pub fn new(store: Arc<dyn AppStore>, engine: Arc<dyn EngineOps>) -> Self {
        Self { store, engine }
    }

    /// Start a job run. Returns the execution id; the run completes in the
    /// background.
    pub async fn run_job(&self, job_id: &Uuid) -> Result<Uuid, CronError> {
        let job = self.store.get_cron_job(job_id).await?;
        if !job.enabled {
            return Err(CronError::Validation(format!(
                "job '{}' is disabled",
                job.name
            )));
        }
        let app = self.store.get_app(&job.app_id).await?;
        if app.status != AppStatus::Running {
            return Err(CronError::Validation(format!(
                "app '{}' is not running",
                app.name
            )));
        }

        let container = app
            .container_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| app.container_name());

        let exec_id = self
            .engine
            .exec_create(
                &container,
                ExecSpec {
                    cmd: vec!["/bin/sh".to_string(), "-c".to_string(), job.command.clone()],
                    tty: false,
                    attach_stdin: false,
                },
            )
            .await?;

        let execution = CronExecution {
            id: Uuid::new_v4(),
            job_id: job.id,
            started_at: Utc::now(),
            ended_at: None,
            status: ExecutionStatus::Running,
            exit_code: None,
            output: String::new(),
        };
        let execution_id = execution.id;
        self.store.insert_cron_execution(execution.clone()).await?;

        let store = self.store.clone();
        let engine = self.engine.clone();
        tokio::spawn(async move {
            let outcome = capture_exec(engine.as_ref(), &exec_id).await;
            finalize(store, execution, job.id, outcome).await;
        });

        Ok(execution_id)
    }
}

struct ExecOutcome {
    output: String,
    exit_code: Option<i64>,
    error: Option<String>,
}

/// Run the exec session to completion, capturing combined output and the
/// exit code.
async fn capture_exec(engine: &dyn EngineOps, exec_id: &str) -> ExecOutcome {
    let mut output = String::new();
    let mut error = None;

    match engine.exec_start(exec_id, false).await {
        Ok(mut session) => {
            while let Some(item) = session.output.next().await {
                match item {
                    Ok(chunk) => {
                        if output.len() < MAX_OUTPUT_BYTES {
                            output.push_str(&String::from_utf8_lossy(&chunk.data));
                        }
                    }
                    Err(e) => {
                        error = Some(e.to_string());
                        break;
                    }
                }
            }
        }
        Err(e) => error = Some(e.to_string()),
    }

    let exit_code = match engine.exec_inspect(exec_id).await {
        Ok(status) => status.exit_code,
        Err(e) => {
            if error.is_none() {
                error = Some(e.to_string());
            }
            None
        }
    };

    ExecOutcome {
        output,
        exit_code,
        error,
    }
}

/// Write the terminal execution record and roll the result up onto the job.
async fn finalize(
    store: Arc<dyn AppStore>,
    mut execution: CronExecution,
    job_id: Uuid,
    outcome: ExecOutcome,
) {
    let succeeded = outcome.error.is_none() && outcome.exit_code == Some(0);
    execution.ended_at = Some(Utc::now());
    execution.status = if succeeded {
        ExecutionStatus::Success
    } else {
        ExecutionStatus::Failed
    };
    execution.exit_code = outcome.exit_code;
    execution.output = outcome.output;
    if let Err(e) = store.update_cron_execution(execution).await {
        warn!(error = %e, "Execution finalize failed");
    }

    match store.get_cron_job(&job_id).await {
        Ok(mut job) => {
            job.last_run = Some(Utc::now());
            job.last_status = Some(if succeeded { "success" } else { "failed" }.to_string());
            job.last_error = outcome.error;
            if let Err(e) = store.update_cron_job(job).await {
                warn!(error = %e, "Job rollup update failed");
            }
        }
        Err(e) => warn!(error = %e, "Job vanished before rollup"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::{App, AppType};
    use crate::deploy::testutil::harness;
    use crate::store::CronJob;
    use std::time::Duration;

    async fn seeded_job(h: &crate::deploy::testutil::Harness, enabled: bool) -> (App, CronJob) {
        let mut app = App::new("worker", AppType::Container);
        h.store.insert_app(app.clone()).await.unwrap();
        let cid = h
            .engine
            .create_container(crate::engine::CreateContainerOpts {
                name: app.container_name(),
                image: "img".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        app.status = AppStatus::Running;
        app.container_id = Some(cid);
        h.store.update_app(app.clone()).await.unwrap();

        let job = CronJob {
            id: Uuid::new_v4(),
            app_id: app.id,
            name: "cleanup".to_string(),
            schedule: "0 4 * * *".to_string(),
            command: "rm -rf /tmp/cache".to_string(),
            enabled,
            last_run: None,
            last_status: None,
            last_error: None,
        };
        h.store.insert_cron_job(job.clone()).await.unwrap();
        (app, job)
    }

    async fn wait_terminal(
        store: &Arc<crate::store::MemoryStore>,
        job_id: &Uuid,
    ) -> CronExecution {
        for _ in 0..100 {
            let executions = store.list_cron_executions(job_id, 10).await.unwrap();
            if let Some(e) = executions.first() {
                if e.status != ExecutionStatus::Running {
                    return e.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution never finalized");
    }

    #[tokio::test]
    async fn test_successful_run_finalizes_execution_and_job() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let (_, job) = seeded_job(&h, true).await;
        h.engine.set_exec_result(b"cleaned 42 files\n", 0).await;

        let runner = CronRunner::new(h.store.clone(), h.engine.clone());
        runner.run_job(&job.id).await.unwrap();

        let execution = wait_terminal(&h.store, &job.id).await;
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.exit_code, Some(0));
        assert!(execution.output.contains("cleaned 42 files"));
        assert!(execution.ended_at.is_some());

        let job = h.store.get_cron_job(&job.id).await.unwrap();
        assert_eq!(job.last_status.as_deref(), Some("success"));
        assert!(job.last_run.is_some());
        assert!(job.last_error.is_none());
    }

    #[tokio::test]
    async fn test_nonzero_exit_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let (_, job) = seeded_job(&h, true).await;
        h.engine.set_exec_result(b"boom\n", 2).await;

        let runner = CronRunner::new(h.store.clone(), h.engine.clone());
        runner.run_job(&job.id).await.unwrap();

        let execution = wait_terminal(&h.store, &job.id).await;
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.exit_code, Some(2));

        let job = h.store.get_cron_job(&job.id).await.unwrap();
        assert_eq!(job.last_status.as_deref(), Some("failed"));
    }

    #[tokio::test]
    async fn test_disabled_job_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let (_, job) = seeded_job(&h, false).await;

        let runner = CronRunner::new(h.store.clone(), h.engine.clone());
        assert!(matches!(
            runner.run_job(&job.id).await.unwrap_err(),
            CronError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_stopped_app_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let (mut app, job) = seeded_job(&h, true).await;
        app.status = AppStatus::Stopped;
        h.store.update_app(app).await.unwrap();

        let runner = CronRunner::new(h.store.clone(), h.engine.clone());
        assert!(matches!(
            runner.run_job(&job.id).await.unwrap_err(),
            CronError::Validation(_)
        ));
    }
}
