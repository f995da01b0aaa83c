//! Docker/Podman engine backed by the bollard API.
//!
//! Connects with automatic fallback (local defaults, then Podman sockets)
//! and implements [`ContainerEngine`] on top of the Docker remote API.

use crate::container::{
    ArchiveStream, Attachment, CommitSpec, ContainerEngine, ContainerError, CreateSpec,
    EngineConfig, OutputSink, Result,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::models::{ContainerConfig, ContainerCreateBody};
use bollard::query_parameters::{
    AttachContainerOptionsBuilder, CommitContainerOptionsBuilder, CreateContainerOptionsBuilder,
    CreateImageOptionsBuilder, DownloadFromContainerOptionsBuilder, RemoveContainerOptionsBuilder,
    StartContainerOptions, TagImageOptionsBuilder, UploadToContainerOptionsBuilder,
};
use futures::stream::{StreamExt, TryStreamExt};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Container engine talking to a Docker or Podman daemon.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
    endpoint: String,
    config: EngineConfig,
}

impl DockerEngine {
    /// Connect to the daemon and verify it answers.
    ///
    /// # Errors
    ///
    /// Returns error if no runtime is reachable.
    pub async fn connect(config: EngineConfig) -> Result<Self> {
        let (docker, endpoint) = Self::open(&config)?;
        docker.ping().await.map_err(|e| {
            ContainerError::Other(format!("Failed to ping container runtime: {}", e))
        })?;
        debug!("Container runtime ping successful");

        Ok(Self {
            docker,
            endpoint,
            config,
        })
    }

    /// Get the underlying Docker client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Tries, in order:
    /// 1. The configured host
    /// 2. Local defaults (the default Unix socket or named pipe)
    /// 3. Rootless, then system Podman sockets
    fn open(config: &EngineConfig) -> Result<(Docker, String)> {
        if let Some(host) = &config.host {
            let docker = if host.starts_with("tcp://") || host.starts_with("http://") {
                Docker::connect_with_http(host, config.timeout, bollard::API_DEFAULT_VERSION)?
            } else {
                Docker::connect_with_socket(host, config.timeout, bollard::API_DEFAULT_VERSION)?
            };
            info!("Connected to container runtime at {}", host);
            return Ok((docker, host.clone()));
        }

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                info!("Connected to container runtime via local defaults");
                return Ok((docker, "unix:///var/run/docker.sock".to_string()));
            }
            Err(e) => debug!("Local defaults failed: {}", e),
        }

        #[cfg(unix)]
        {
            let mut sockets = Vec::new();
            if let Ok(home) = std::env::var("HOME") {
                sockets.push(format!("unix://{}/run/podman/podman.sock", home));
            }
            sockets.push("unix:///run/podman/podman.sock".to_string());

            for socket in sockets {
                debug!("Trying Podman socket: {}", socket);
                match Docker::connect_with_socket(
                    &socket,
                    config.timeout,
                    bollard::API_DEFAULT_VERSION,
                ) {
                    Ok(docker) => {
                        info!("Connected to Podman via {}", socket);
                        return Ok((docker, socket));
                    }
                    Err(e) => debug!("Podman socket {} failed: {}", socket, e),
                }
            }
        }

        Err(ContainerError::Other(
            "Failed to connect to Docker or Podman. Please ensure Docker or Podman is installed and running.".to_string(),
        ))
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ContainerError::ApiError(e)),
        }
    }

    async fn pull_image(&self, image: &str, log: &OutputSink) -> Result<()> {
        info!("Pulling image: {}", image);
        let options = CreateImageOptionsBuilder::new().from_image(image).build();
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            let info = result?;
            if let Some(error) = info.error {
                return Err(ContainerError::Other(format!("Pull failed: {}", error)));
            }
            if let Some(status) = info.status {
                debug!("Pull: {}", status);
                log.write_bytes(format!("{}\n", status).as_bytes())?;
            }
        }

        info!("Successfully pulled image: {}", image);
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn create_container(&self, spec: &CreateSpec, log: &OutputSink) -> Result<String> {
        if !self.image_exists(&spec.image).await? {
            self.pull_image(&spec.image, log).await?;
        }

        let name = format!("{}-{}", self.config.name_prefix, uuid::Uuid::new_v4());
        let options = CreateContainerOptionsBuilder::new().name(&name).build();
        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            entrypoint: spec.entrypoint.clone(),
            cmd: spec.cmd.clone(),
            attach_stdout: Some(spec.attach_stdout),
            attach_stderr: Some(spec.attach_stderr),
            ..Default::default()
        };

        let response = self.docker.create_container(Some(options), body).await?;
        info!("Created container: {} ({})", name, response.id);
        Ok(response.id)
    }

    async fn attach_container(
        &self,
        id: &str,
        stdout: OutputSink,
        stderr: OutputSink,
    ) -> Result<Attachment> {
        let options = AttachContainerOptionsBuilder::new()
            .stream(true)
            .stdout(true)
            .stderr(true)
            .build();

        // The connection is upgraded once this returns, so the stream is live
        let bollard::container::AttachContainerResults { mut output, .. } =
            self.docker.attach_container(id, Some(options)).await?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let container = id.to_string();
        let drain = tokio::spawn(async move {
            while let Some(chunk) = output.next().await {
                match chunk? {
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        stdout.write_bytes(&message)?
                    }
                    LogOutput::StdErr { message } => stderr.write_bytes(&message)?,
                    LogOutput::StdIn { .. } => {}
                }
            }
            debug!("Output stream of {} closed", container);
            Ok::<(), ContainerError>(())
        });

        let _ = ready_tx.send(());
        Ok(Attachment::new(ready_rx, drain))
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await?;
        info!("Started container: {}", id);
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptionsBuilder::new()
            .force(force)
            .v(true)
            .build();
        self.docker.remove_container(id, Some(options)).await?;
        info!("Removed container: {}", id);
        Ok(())
    }

    async fn commit_container(&self, spec: &CommitSpec) -> Result<String> {
        let options = CommitContainerOptionsBuilder::new()
            .container(&spec.container)
            .repo(&spec.repository)
            .tag(&spec.tag)
            .build();
        let image = self
            .docker
            .commit_container(options, ContainerConfig::default())
            .await?;
        info!(
            "Committed container {} as {}:{} ({})",
            spec.container, spec.repository, spec.tag, image.id
        );
        Ok(image.id)
    }

    async fn download_from_container(&self, id: &str, path: &str) -> Result<ArchiveStream> {
        let options = DownloadFromContainerOptionsBuilder::new().path(path).build();
        let mut stream = self
            .docker
            .download_from_container(id, Some(options))
            .map_ok(|bytes| bytes.to_vec())
            .map_err(std::io::Error::other)
            .boxed();

        // Surface missing paths now rather than on the first read
        let first = match stream.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                return Err(ContainerError::NotFound(format!("{} in {}: {}", path, id, e)));
            }
            None => Vec::new(),
        };
        Ok(futures::stream::once(async move { Ok(first) })
            .chain(stream)
            .boxed())
    }

    async fn upload_to_container(&self, id: &str, path: &str, tar: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptionsBuilder::new().path(path).build();
        self.docker
            .upload_to_container(id, Some(options), bollard::body_full(tar.into()))
            .await?;
        debug!("Uploaded archive to {}:{}", id, path);
        Ok(())
    }

    async fn tag_image(&self, image: &str, repository: &str, tag: &str) -> Result<()> {
        let options = TagImageOptionsBuilder::new().repo(repository).tag(tag).build();
        self.docker.tag_image(image, Some(options)).await?;
        info!("Tagged {} as {}:{}", image, repository, tag);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.timeout, 120);
        assert!(config.host.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Docker/Podman to be running
    async fn test_engine_connection() {
        let engine = DockerEngine::connect(EngineConfig::default()).await.unwrap();
        assert!(!engine.endpoint().is_empty());
    }
}
