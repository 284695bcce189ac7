//! Container domain — create, lifecycle, inspect, list, logs, stats.

use std::collections::HashMap;

use bollard::container::LogOutput;
use bollard::models::{
    ContainerCreateBody, ContainerStatsResponse, ContainerSummary, EndpointSettings, HostConfig,
    NetworkingConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StatsOptions, StopContainerOptions,
};
use futures_util::stream::StreamExt;

use super::client::{DockerEngine, EngineError};
use super::ops::{ContainerDetails, CreateContainerOpts, LogChunk, StatsSample};
use super::APP_NETWORK;

impl DockerEngine {
    /// Create a container attached to the shared app network.
    ///
    /// Published ports bind to loopback unless the port is marked external.
    pub async fn create_container(
        &self,
        opts: CreateContainerOpts,
    ) -> Result<String, EngineError> {
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: Vec<String> = Vec::new();
        for port in &opts.ports {
            let key = format!("{}/{}", port.container_port, port.protocol);
            exposed_ports.push(key.clone());
            let host_ip = if port.external { "0.0.0.0" } else { "127.0.0.1" };
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some(host_ip.to_string()),
                    host_port: Some(port.host_port.to_string()),
                }]),
            );
        }

        let host_config = HostConfig {
            binds: if opts.volumes.is_empty() {
                None
            } else {
                Some(opts.volumes.clone())
            },
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            memory: if opts.memory_bytes > 0 {
                Some(opts.memory_bytes)
            } else {
                None
            },
            nano_cpus: if opts.cpus > 0.0 {
                Some((opts.cpus * 1_000_000_000.0) as i64)
            } else {
                None
            },
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut endpoints = HashMap::new();
        endpoints.insert(APP_NETWORK.to_string(), EndpointSettings::default());

        let body = ContainerCreateBody {
            image: Some(opts.image.clone()),
            env: if opts.env.is_empty() {
                None
            } else {
                Some(opts.env.clone())
            },
            cmd: opts.command.clone(),
            labels: Some(opts.labels.clone()),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            networking_config: Some(NetworkingConfig {
                endpoints_config: Some(endpoints),
            }),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: Some(opts.name.clone()),
            ..Default::default()
        });

        let response = self
            .client
            .create_container(options, body)
            .await
            .map_err(|e| EngineError::from_status(e, &opts.name))?;

        Ok(response.id)
    }

    pub async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.client
            .start_container(id, None)
            .await
            .map_err(|e| EngineError::from_status(e, id))
    }

    pub async fn stop_container(&self, id: &str, grace_secs: u32) -> Result<(), EngineError> {
        let options = Some(StopContainerOptions {
            t: Some(grace_secs as i32),
            ..Default::default()
        });

        self.client
            .stop_container(id, options)
            .await
            .map_err(|e| EngineError::from_status(e, id))
    }

    pub async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        let options = Some(RemoveContainerOptions {
            force,
            ..Default::default()
        });

        self.client
            .remove_container(id, options)
            .await
            .map_err(|e| EngineError::from_status(e, id))
    }

    pub async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError> {
        let details = self
            .client
            .inspect_container(id, None)
            .await
            .map_err(|e| EngineError::from_status(e, id))?;

        Ok(ContainerDetails {
            id: details.id.unwrap_or_default(),
            name: details
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image: details.image.unwrap_or_default(),
            state: details
                .state
                .as_ref()
                .and_then(|s| s.status.as_ref())
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".into()),
            labels: details.config.and_then(|c| c.labels).unwrap_or_default(),
        })
    }

    pub async fn list_containers(&self, all: bool) -> Result<Vec<ContainerDetails>, EngineError> {
        let options = Some(ListContainersOptions {
            all,
            ..Default::default()
        });
        let containers = self.client.list_containers(options).await?;
        Ok(containers.into_iter().map(summary_to_details).collect())
    }

    /// Recent log chunks; stdout and stderr, newest `tail` lines.
    pub async fn container_logs(&self, id: &str, tail: u32) -> Result<Vec<LogChunk>, EngineError> {
        let options = LogsOptions {
            follow: false,
            stdout: true,
            stderr: true,
            since: 0,
            until: 0,
            timestamps: false,
            tail: tail.to_string(),
        };

        let mut stream = self.client.logs(id, Some(options));
        let mut chunks = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(output) => chunks.push(log_output_to_chunk(output)),
                Err(e) => return Err(EngineError::from_status(e, id)),
            }
        }
        Ok(chunks)
    }

    /// One stats snapshot, reduced to the persisted fields.
    pub async fn container_stats(&self, id: &str) -> Result<StatsSample, EngineError> {
        let options = Some(StatsOptions {
            stream: false,
            ..Default::default()
        });

        let mut stream = self.client.stats(id, options);
        match stream.next().await {
            Some(Ok(response)) => Ok(reduce_stats(&response)),
            Some(Err(e)) => Err(EngineError::from_status(e, id)),
            None => Err(EngineError::NotFound(id.to_string())),
        }
    }
}

pub(super) fn log_output_to_chunk(output: LogOutput) -> LogChunk {
    let stderr = matches!(output, LogOutput::StdErr { .. });
    LogChunk {
        stderr,
        data: output.into_bytes(),
    }
}

fn summary_to_details(summary: ContainerSummary) -> ContainerDetails {
    ContainerDetails {
        id: summary.id.unwrap_or_default(),
        name: summary
            .names
            .as_deref()
            .and_then(|names| names.first())
            .map(|n| n.trim_start_matches('/'))
            .unwrap_or_default()
            .to_string(),
        image: summary.image.unwrap_or_default(),
        state: summary
            .state
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".into()),
        labels: summary.labels.unwrap_or_default(),
    }
}

/// Reduce an engine stats response to the sample we persist.
///
/// CPU percent uses the delta between the sample and the pre-sample, scaled
/// by the number of online CPUs, matching `docker stats`.
pub(super) fn reduce_stats(response: &ContainerStatsResponse) -> StatsSample {
    let cpu_total = response
        .cpu_stats
        .as_ref()
        .and_then(|c| c.cpu_usage.as_ref())
        .and_then(|u| u.total_usage)
        .unwrap_or(0);
    let precpu_total = response
        .precpu_stats
        .as_ref()
        .and_then(|c| c.cpu_usage.as_ref())
        .and_then(|u| u.total_usage)
        .unwrap_or(0);
    let system = response
        .cpu_stats
        .as_ref()
        .and_then(|c| c.system_cpu_usage)
        .unwrap_or(0);
    let presystem = response
        .precpu_stats
        .as_ref()
        .and_then(|c| c.system_cpu_usage)
        .unwrap_or(0);
    let online_cpus = response
        .cpu_stats
        .as_ref()
        .and_then(|c| c.online_cpus)
        .unwrap_or(1)
        .max(1) as f64;

    let cpu_delta = cpu_total.saturating_sub(precpu_total) as f64;
    let system_delta = system.saturating_sub(presystem) as f64;
    let cpu_percent = if system_delta > 0.0 && cpu_delta > 0.0 {
        (cpu_delta / system_delta) * online_cpus * 100.0
    } else {
        0.0
    };

    let (net_in, net_out) = response
        .networks
        .as_ref()
        .map(|nets| {
            nets.values().fold((0u64, 0u64), |(rx, tx), n| {
                (
                    rx + n.rx_bytes.unwrap_or(0),
                    tx + n.tx_bytes.unwrap_or(0),
                )
            })
        })
        .unwrap_or((0, 0));

    StatsSample {
        cpu_percent,
        mem_usage: response
            .memory_stats
            .as_ref()
            .and_then(|m| m.usage)
            .unwrap_or(0),
        mem_limit: response
            .memory_stats
            .as_ref()
            .and_then(|m| m.limit)
            .unwrap_or(0),
        net_in,
        net_out,
    }
}
