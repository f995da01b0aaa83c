//! Limiter-aware container engine handle.
//!
//! Provides the interface build steps use to reach the engine. Calls that
//! create containers or images go through the configured action limiter
//! first.

use crate::container::{
    ArchiveStream, Attachment, CommitSpec, ContainerEngine, CreateSpec, OutputSink, Result,
};
use crate::limiter::{ActionLimiter, NoopLimiter};
use std::sync::Arc;
use tracing::debug;

/// Container engine handle shared by every build step.
#[derive(Clone)]
pub struct ContainerClient {
    engine: Arc<dyn ContainerEngine>,
    limiter: Arc<dyn ActionLimiter>,
}

impl std::fmt::Debug for ContainerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerClient")
            .field("endpoint", &self.engine.endpoint())
            .field("limit", &self.limiter.limit())
            .finish()
    }
}

impl ContainerClient {
    /// Create a client using `limiter` to throttle mutating calls.
    pub fn new(engine: Arc<dyn ContainerEngine>, limiter: Arc<dyn ActionLimiter>) -> Self {
        Self { engine, limiter }
    }

    /// Create a client without action limiting.
    pub fn unlimited(engine: Arc<dyn ContainerEngine>) -> Self {
        Self::new(engine, Arc::new(NoopLimiter))
    }

    /// Get the underlying engine.
    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    pub fn endpoint(&self) -> &str {
        self.engine.endpoint()
    }

    /// Action cap applied per engine host, zero when unlimited.
    pub fn limit(&self) -> u32 {
        self.limiter.limit()
    }

    /// Create a container once an action slot for the engine host is free.
    ///
    /// # Errors
    ///
    /// Returns error if the limiter or the engine fails.
    pub async fn create_container(&self, spec: &CreateSpec, log: &OutputSink) -> Result<String> {
        let _permit = self.limiter.acquire(self.engine.endpoint()).await?;
        debug!("Creating container from image {}", spec.image);
        self.engine.create_container(spec, log).await
    }

    pub async fn attach_container(
        &self,
        id: &str,
        stdout: OutputSink,
        stderr: OutputSink,
    ) -> Result<Attachment> {
        self.engine.attach_container(id, stdout, stderr).await
    }

    pub async fn start_container(&self, id: &str) -> Result<()> {
        self.engine.start_container(id).await
    }

    /// Remove a container. An empty ID is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the engine refuses the removal.
    pub async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        if id.is_empty() {
            return Ok(());
        }
        self.engine.remove_container(id, force).await
    }

    /// Commit a container as `repository:tag`, returning the image ID.
    ///
    /// # Errors
    ///
    /// Returns error if the limiter or the engine fails.
    pub async fn commit_container(&self, spec: &CommitSpec) -> Result<String> {
        let _permit = self.limiter.acquire(self.engine.endpoint()).await?;
        self.engine.commit_container(spec).await
    }

    pub async fn download_from_container(&self, id: &str, path: &str) -> Result<ArchiveStream> {
        self.engine.download_from_container(id, path).await
    }

    pub async fn upload_to_container(&self, id: &str, path: &str, tar: Vec<u8>) -> Result<()> {
        self.engine.upload_to_container(id, path, tar).await
    }

    pub async fn tag_image(&self, image: &str, repository: &str, tag: &str) -> Result<()> {
        self.engine.tag_image(image, repository, tag).await
    }
}
