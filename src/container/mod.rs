//! Container engine access layer.
//!
//! The build pipeline talks to the container engine through the narrow
//! [`ContainerEngine`] trait. [`DockerEngine`] implements it on top of the
//! bollard Docker API; tests plug in scripted engines.
//!
//! ## Architecture
//!
//! - [`engine`]: the engine trait and its request types
//! - [`client`]: [`ContainerClient`], the limiter-aware handle handed to build steps
//! - [`guard`]: [`ContainerGuard`], scoped ownership of an ephemeral container
//! - [`output`]: shareable output sinks for build logs and captured output
//! - [`runner`]: [`CommandRunner`], one shell command in one fresh container
//! - [`memory`]: [`MemoryEngine`], a recording engine for dry runs and tests
//! - [`docker`]: bollard-backed engine (feature `containers`)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use deploy_builder::container::{CommandRunner, ContainerClient, DockerEngine, OutputSink, SharedBuffer};
//! use deploy_builder::limiter::NoopLimiter;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = DockerEngine::connect(Default::default()).await?;
//!     let client = ContainerClient::new(Arc::new(engine), Arc::new(NoopLimiter));
//!
//!     let output = SharedBuffer::default();
//!     let run = CommandRunner::new(client)
//!         .run("alpine:latest", "echo hello", &OutputSink::stdout(), OutputSink::new(output.clone()), None)
//!         .await;
//!     let (container, result) = run.into_parts();
//!     container.release().await;
//!     result?;
//!
//!     println!("{}", output.to_string_lossy());
//!     Ok(())
//! }
//! ```

mod client;
#[cfg(feature = "containers")]
mod docker;
mod engine;
mod guard;
mod memory;
mod output;
mod runner;

pub use client::ContainerClient;
#[cfg(feature = "containers")]
pub use docker::DockerEngine;
pub use engine::{
    ArchiveStream, Attachment, CommitSpec, ContainerEngine, CreateSpec, EngineConfig,
};
pub use guard::ContainerGuard;
pub use memory::{EngineCall, MemoryEngine, Operation};
pub use output::{OutputSink, SharedBuffer};
pub use runner::{CommandRun, CommandRunner};

/// Container engine errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Docker/Podman API error
    #[cfg(feature = "containers")]
    #[error("Container API error: {0}")]
    ApiError(#[from] bollard::errors::Error),

    /// Container or image not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Command execution error
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Action limiter error
    #[error("Limiter error: {0}")]
    LimitError(#[from] crate::limiter::LimitError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// General error
    #[error("Container error: {0}")]
    Other(String),
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;
