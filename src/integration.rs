//! # Build System Assembly
//!
//! Wires configuration, action limiter, container engine and build
//! pipeline into a single [`BuildSystem`].
//!
//! ## System Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │                   BuildSystem                     │
//! │  ┌──────────────┐ ┌──────────────┐ ┌────────────┐ │
//! │  │   Archive    │ │    Image     │ │   Deploy   │ │
//! │  │   Resolver   │ │   Pipeline   │ │  Archive   │ │
//! │  └──────────────┘ └──────────────┘ └────────────┘ │
//! │         ContainerClient (engine + limiter)        │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use deploy_builder::BuildSystem;
//! use deploy_builder::builder::{BuildOptions, BuildSource};
//! use deploy_builder::cli::BuilderConfig;
//! use deploy_builder::container::OutputSink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let system = BuildSystem::connect(BuilderConfig::default()).await?;
//!     let image = system
//!         .build(
//!             "web",
//!             BuildOptions::new(BuildSource::Image("registry/web:v1".to_string())),
//!             &OutputSink::stdout(),
//!         )
//!         .await?;
//!     println!("Built {}", image);
//!     Ok(())
//! }
//! ```

use crate::builder::{
    App, Archive, ArchiveResolver, BuildError, BuildOptions, DeployArchiveBuilder, DockerBuilder,
    ImagePipeline, StaticImageNames, TaggingPreparer,
};
use crate::cli::{BuilderConfig, SourceArgs};
use crate::container::{ContainerClient, ContainerEngine, OutputSink};
use crate::limiter::limiter_from_config;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Fully wired image builder.
#[derive(Debug)]
pub struct BuildSystem {
    client: ContainerClient,
    builder: DockerBuilder,
}

impl BuildSystem {
    /// Assemble the pipeline on top of `engine`.
    pub fn new(config: BuilderConfig, engine: Arc<dyn ContainerEngine>) -> Result<Self> {
        let limiter = limiter_from_config(&config.limit);
        let client = ContainerClient::new(engine, limiter);

        let names = Arc::new(StaticImageNames::from(config.apps));
        let resolver = ArchiveResolver::new(client.clone(), names, &config.download)
            .context("Failed to initialise archive resolver")?;

        let preparer = Arc::new(TaggingPreparer::new(config.deploy.registry.clone()));
        let pipeline = ImagePipeline::new(client.clone(), preparer);
        let archives = Arc::new(DeployArchiveBuilder::new(
            client.clone(),
            config.deploy,
            pipeline.clone(),
        ));

        info!(
            "Build system ready on {} (action limit {})",
            client.endpoint(),
            client.limit()
        );
        Ok(Self {
            builder: DockerBuilder::new(resolver, pipeline, archives),
            client,
        })
    }

    /// Connect to the configured Docker or Podman daemon and assemble the
    /// pipeline on top of it.
    #[cfg(feature = "containers")]
    pub async fn connect(config: BuilderConfig) -> Result<Self> {
        let engine = crate::container::DockerEngine::connect(config.docker.clone())
            .await
            .context("Failed to connect to container engine")?;
        Self::new(config, Arc::new(engine))
    }

    pub fn client(&self) -> &ContainerClient {
        &self.client
    }

    /// Build a deployable image for `app`; returns its reference.
    pub async fn build(
        &self,
        app: &str,
        options: BuildOptions,
        log: &OutputSink,
    ) -> std::result::Result<String, BuildError> {
        self.builder.build(&App::new(app), options, log).await
    }
}

/// Turn command line source flags into build options, opening the archive
/// file when one was given.
pub async fn load_build_options(
    source: &SourceArgs,
    tag: Option<String>,
    dockerfile: bool,
) -> Result<BuildOptions> {
    let archive = match &source.archive {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open archive {:?}", path))?;
            let size = file
                .metadata()
                .await
                .with_context(|| format!("Failed to read metadata of {:?}", path))?
                .len();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| crate::env::ARCHIVE_NAME.to_string());
            Some(Archive::from_reader(name, file, Some(size)))
        }
        None => None,
    };

    let mut options = BuildOptions::from_fields(
        archive,
        source.rebuild,
        source.url.clone(),
        source.image.clone(),
    );
    options.tag = tag;
    options.build_from_file = dockerfile;
    Ok(options)
}
