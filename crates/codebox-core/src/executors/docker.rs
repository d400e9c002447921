// src/executors/docker.rs
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    LogsOptions as BollardLogsOptionsQuery,
    RemoveContainerOptions as BollardRemoveContainerOptionsQuery,
    StartContainerOptions as BollardStartContainerOptionsQuery,
    WaitContainerOptions as BollardWaitContainerOptionsQuery,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use super::{SandboxConnector, SandboxExecutor, SandboxOutput, WaitOutcome};
use crate::config::SandboxConfig;
use crate::errors::SandboxError;

/// Runs sandboxes as Docker containers.
pub struct DockerSandboxExecutor {
    docker: Docker,
    mount_path: String,
    auto_remove: bool,
}

impl DockerSandboxExecutor {
    pub fn new(config: &SandboxConfig) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::ConnectionFailed(e.to_string()))?;
        Ok(Self::with_client(docker, config))
    }

    pub fn with_client(docker: Docker, config: &SandboxConfig) -> Self {
        Self {
            docker,
            mount_path: config.mount_path.clone(),
            auto_remove: config.auto_remove,
        }
    }

    fn create_body(&self, image: &str, host_path: &str) -> ContainerCreateBody {
        ContainerCreateBody {
            image: Some(image.to_string()),
            host_config: Some(HostConfig {
                binds: Some(vec![format!("{}:{}", host_path, self.mount_path)]),
                auto_remove: Some(self.auto_remove),
                ..Default::default()
            }),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        }
    }
}

#[async_trait]
impl SandboxExecutor for DockerSandboxExecutor {
    async fn create(&self, image: &str, host_path: &Path) -> Result<String, SandboxError> {
        let host_path = host_path
            .to_str()
            .ok_or_else(|| SandboxError::Runtime("Workspace path is not valid UTF-8".to_string()))?;

        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(format!("codebox-{}", Uuid::new_v4())),
            ..Default::default()
        });

        let container = self
            .docker
            .create_container(options, self.create_body(image, host_path))
            .await?;
        log::debug!("Created container {} from image {}", container.id, image);
        Ok(container.id)
    }

    async fn start(&self, sandbox_id: &str) -> Result<(), SandboxError> {
        self.docker
            .start_container(sandbox_id, None::<BollardStartContainerOptionsQuery>)
            .await?;
        Ok(())
    }

    async fn wait_until_exited(&self, sandbox_id: &str) -> WaitOutcome {
        let mut wait_stream = self.docker.wait_container(
            sandbox_id,
            Some(BollardWaitContainerOptionsQuery {
                condition: "not-running".to_string(),
                ..Default::default()
            }),
        );

        match wait_stream.next().await {
            Some(Ok(response)) => match response.error.and_then(|e| e.message) {
                Some(message) if !message.is_empty() => WaitOutcome::Errored(message),
                _ => WaitOutcome::Exited(response.status_code),
            },
            // bollard reports a non-zero exit status as an error; it is still an exit.
            Some(Err(BollardError::DockerContainerWaitError { error, code })) if error.is_empty() => {
                WaitOutcome::Exited(code)
            }
            Some(Err(e)) => WaitOutcome::Errored(e.to_string()),
            None => WaitOutcome::Errored(format!(
                "Wait stream for container {} ended unexpectedly",
                sandbox_id
            )),
        }
    }

    async fn fetch_output(&self, sandbox_id: &str) -> Result<SandboxOutput, SandboxError> {
        let mut output_stream = self.docker.logs(
            sandbox_id,
            Some(BollardLogsOptionsQuery {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut output = SandboxOutput::default();
        while let Some(log_result) = output_stream.next().await {
            match log_result? {
                LogOutput::StdOut { message } => {
                    output.stdout.push_str(&String::from_utf8_lossy(&message))
                }
                LogOutput::StdErr { message } => {
                    output.stderr.push_str(&String::from_utf8_lossy(&message))
                }
                _ => {}
            }
        }
        Ok(output)
    }

    async fn remove(&self, sandbox_id: &str) -> Result<(), SandboxError> {
        let options = Some(BollardRemoveContainerOptionsQuery {
            force: true,
            ..Default::default()
        });

        match self.docker.remove_container(sandbox_id, options).await {
            Ok(()) => Ok(()),
            // Auto-removal got there first.
            Err(BollardError::DockerResponseServerError { status_code, message })
                if status_code == 404 || (status_code == 409 && message.contains("in progress")) =>
            {
                log::debug!("Container {} already removed: {}", sandbox_id, message);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Opens a fresh Docker client for each worker.
#[derive(Debug, Clone, Default)]
pub struct DockerConnector {
    config: SandboxConfig,
}

impl DockerConnector {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }
}

impl SandboxConnector for DockerConnector {
    fn connect(&self) -> Result<Arc<dyn SandboxExecutor>, SandboxError> {
        Ok(Arc::new(DockerSandboxExecutor::new(&self.config)?))
    }
}
