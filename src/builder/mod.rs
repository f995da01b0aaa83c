//! Application image build pipeline.
//!
//! Turns application source into a deployable image:
//!
//! 1. [`archive`] resolves the build source (uploaded archive, previous
//!    build, URL download or existing image)
//! 2. archives go through an [`ArchiveBuilder`] (by default
//!    [`DeployArchiveBuilder`]), which produces an image
//! 3. [`ImagePipeline`] reads the Procfile and manifest from the image,
//!    runs the manifest's build hooks and hands the result to an
//!    [`ImagePreparer`]
//!
//! Every ephemeral container is removed once its step finishes, whatever
//! the outcome.

pub mod archive;
pub mod collaborators;
pub mod deploy;
pub mod hooks;
pub mod image_ref;
pub mod metadata;
pub mod options;
pub mod pipeline;

pub use archive::{ArchiveResolver, DownloadConfig, ResolvedSource};
pub use collaborators::{
    ArchiveBuilder, ImageNameResolver, ImagePreparer, PrepareImageArgs, StaticImageNames,
    TaggingPreparer,
};
pub use deploy::{DeployArchiveBuilder, DeployConfig};
pub use hooks::HookExecutor;
pub use image_ref::ImageReference;
pub use metadata::{CustomData, Hooks, ManifestData, MetadataExtractor};
pub use options::{Archive, BuildOptions, BuildSource};
pub use pipeline::{DockerBuilder, ImagePipeline};

use crate::container::{ContainerError, ContainerGuard};
use async_trait::async_trait;

/// Build pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Requested build mode is not available
    #[error("{0} is not yet supported")]
    Unsupported(String),

    /// No build source was provided
    #[error("no valid files found")]
    NoValidSource,

    /// Application image or archive could not be located
    #[error("{0}")]
    NotFound(String),

    #[error("failed to initialise HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("invalid archive URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to download archive from {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("archive download from {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    /// Download completed without transferring any byte
    #[error("archive file is empty")]
    EmptyArchive,

    /// Engine call failed during a named step
    #[error("{context}: {source}")]
    Engine {
        context: String,
        #[source]
        source: ContainerError,
    },

    /// Manifest found but not parseable
    #[error("invalid manifest in image {image}: {source}")]
    Manifest {
        image: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("image preparation failed for app {app}: {message}")]
    Preparation { app: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Wrap an engine error with the step it happened in.
    pub fn engine(context: impl Into<String>, source: ContainerError) -> Self {
        Self::Engine {
            context: context.into(),
            source,
        }
    }
}

/// Result type for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Application being built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct App {
    pub name: String,
}

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Result of a build step that ran in an ephemeral container.
///
/// The container is returned even when the step failed so the caller can
/// remove it.
#[derive(Debug)]
pub struct StepOutcome<T> {
    pub container: ContainerGuard,
    pub result: Result<T>,
}

impl<T> StepOutcome<T> {
    pub fn into_parts(self) -> (ContainerGuard, Result<T>) {
        (self.container, self.result)
    }

    /// Remove the step's container, then return the step result.
    pub async fn finish(self) -> Result<T> {
        self.container.release().await;
        self.result
    }
}

/// Produces a deployable image for an application.
#[async_trait]
pub trait Builder: Send + Sync {
    async fn build(
        &self,
        app: &App,
        options: BuildOptions,
        log: &crate::container::OutputSink,
    ) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = BuildError::NotFound("App myapp image not found".to_string());
        assert_eq!(err.to_string(), "App myapp image not found");

        let err = BuildError::engine(
            "running build hooks in myapp:latest",
            ContainerError::Other("boom".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "running build hooks in myapp:latest: Container error: boom"
        );

        assert_eq!(
            BuildError::Unsupported("build image from Dockerfile".to_string()).to_string(),
            "build image from Dockerfile is not yet supported"
        );
    }
}
