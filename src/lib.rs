//! # Deploy Builder
//!
//! Builds deployable application images by running build steps inside
//! ephemeral containers.
//!
//! Given application source (an uploaded archive, the archive kept in a
//! previous build, an archive URL or an existing image), the builder runs
//! the platform deploy command, reads the Procfile and application manifest
//! from the resulting image, runs the manifest's build hooks and tags the
//! result for deployment.
//!
//! ## Architecture Overview
//!
//! - **[`builder`]**: Build options, source resolution, metadata steps, hooks and orchestration
//! - **[`container`]**: Container engine abstraction, Docker engine, command runner
//! - **[`limiter`]**: Per-host throttling of container-creating actions
//! - **[`integration`]**: Assembly of the whole pipeline from configuration
//! - **[`cli`]**: Command line parsing and configuration discovery
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deploy_builder::BuildSystem;
//! use deploy_builder::builder::{BuildOptions, BuildSource};
//! use deploy_builder::cli::ConfigDiscovery;
//! use deploy_builder::container::OutputSink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigDiscovery::discover_config(None)?;
//!     let system = BuildSystem::connect(config).await?;
//!
//!     let image = system
//!         .build("web", BuildOptions::new(BuildSource::Rebuild), &OutputSink::stdout())
//!         .await?;
//!     println!("Image ready: {}", image);
//!     Ok(())
//! }
//! ```

/// Application image build pipeline.
pub mod builder;

/// Container engine access layer.
pub mod container;

/// Action limiting for container engine hosts.
pub mod limiter;

/// Assembly of the build pipeline from configuration.
pub mod integration;

/// Environment constants and path utilities.
///
/// Centralizes the fixed paths and file names used inside application
/// images and for configuration discovery.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use builder::{App, BuildError, BuildOptions, BuildSource, DockerBuilder};
pub use container::{ContainerClient, ContainerEngine, ContainerError, OutputSink};
pub use integration::{BuildSystem, load_build_options};
pub use limiter::{ActionLimiter, LimitConfig};
