//! Container engine contract consumed by the build pipeline.

use crate::container::{ContainerError, OutputSink, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Chunked tar stream produced by an archive export.
pub type ArchiveStream = BoxStream<'static, std::io::Result<Vec<u8>>>;

/// Engine connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit daemon address (`unix://...` or `tcp://...`); local defaults when unset
    pub host: Option<String>,
    /// Connection timeout in seconds
    pub timeout: u64,
    /// Prefix for the names of containers created by the builder
    pub name_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: None,
            timeout: 120,
            name_prefix: "deploy-builder".to_string(),
        }
    }
}

/// Parameters for creating a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateSpec {
    pub image: String,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
}

impl CreateSpec {
    /// Container running `command` through `/bin/sh -c` with output captured.
    pub fn shell(image: &str, command: &str) -> Self {
        Self {
            image: image.to_string(),
            entrypoint: Some(
                crate::env::SHELL_ENTRYPOINT
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            cmd: Some(vec![command.to_string()]),
            attach_stdout: true,
            attach_stderr: true,
        }
    }

    /// Container using the image's own entrypoint, never started by the builder.
    pub fn from_image(image: &str) -> Self {
        Self {
            image: image.to_string(),
            attach_stdout: true,
            attach_stderr: true,
            ..Default::default()
        }
    }
}

/// Parameters for committing a container filesystem as an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSpec {
    pub container: String,
    pub repository: String,
    pub tag: String,
}

/// A live attachment to a container's output streams.
///
/// `ready` fires once the stream is established; output is drained into the
/// sinks by a background task that finishes when the container exits.
#[derive(Debug)]
pub struct Attachment {
    ready: Option<oneshot::Receiver<()>>,
    drain: JoinHandle<Result<()>>,
}

impl Attachment {
    pub fn new(ready: oneshot::Receiver<()>, drain: JoinHandle<Result<()>>) -> Self {
        Self {
            ready: Some(ready),
            drain,
        }
    }

    /// Block until the attached stream is live.
    pub async fn ready(&mut self) -> Result<()> {
        match self.ready.take() {
            Some(rx) => rx.await.map_err(|_| {
                ContainerError::ExecutionError(
                    "attach stream closed before it became ready".to_string(),
                )
            }),
            None => Ok(()),
        }
    }

    /// Block until output draining has finished.
    pub async fn wait(self) -> Result<()> {
        self.drain
            .await
            .map_err(|e| ContainerError::Other(format!("Output drain task failed: {}", e)))?
    }
}

/// Operations the build pipeline needs from a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Identifies the engine host; used as the action-limiter resource key.
    fn endpoint(&self) -> &str;

    /// Pull the image if missing, then create a container. Returns its ID.
    async fn create_container(&self, spec: &CreateSpec, log: &OutputSink) -> Result<String>;

    /// Attach to a created (not yet started) container's stdout and stderr.
    async fn attach_container(
        &self,
        id: &str,
        stdout: OutputSink,
        stderr: OutputSink,
    ) -> Result<Attachment>;

    async fn start_container(&self, id: &str) -> Result<()>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<()>;

    /// Commit a container filesystem; returns the new image ID.
    async fn commit_container(&self, spec: &CommitSpec) -> Result<String>;

    /// Export `path` from a container as a tar stream.
    async fn download_from_container(&self, id: &str, path: &str) -> Result<ArchiveStream>;

    /// Extract a tar archive into `path` inside a container.
    async fn upload_to_container(&self, id: &str, path: &str, tar: Vec<u8>) -> Result<()>;

    async fn tag_image(&self, image: &str, repository: &str, tag: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_spec() {
        let spec = CreateSpec::shell("myapp:latest", "echo hi");
        assert_eq!(
            spec.entrypoint,
            Some(vec!["/bin/sh".to_string(), "-c".to_string()])
        );
        assert_eq!(spec.cmd, Some(vec!["echo hi".to_string()]));
        assert!(spec.attach_stdout && spec.attach_stderr);
    }

    #[tokio::test]
    async fn test_attachment_ready_then_wait() {
        let (tx, rx) = oneshot::channel();
        let drain = tokio::spawn(async { Ok::<(), ContainerError>(()) });
        let mut attachment = Attachment::new(rx, drain);

        tx.send(()).unwrap();
        attachment.ready().await.unwrap();
        // Second call is a no-op
        attachment.ready().await.unwrap();
        attachment.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_attachment_ready_fails_when_sender_dropped() {
        let (tx, rx) = oneshot::channel::<()>();
        drop(tx);
        let mut attachment = Attachment::new(rx, tokio::spawn(async { Ok::<(), ContainerError>(()) }));
        assert!(matches!(
            attachment.ready().await,
            Err(ContainerError::ExecutionError(_))
        ));
    }
}
