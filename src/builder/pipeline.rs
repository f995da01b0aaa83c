//! Build orchestration.

use crate::builder::{
    App, ArchiveBuilder, ArchiveResolver, BuildError, BuildOptions, Builder, CustomData,
    HookExecutor, ImagePreparer, ImageReference, MetadataExtractor, PrepareImageArgs,
    ResolvedSource, Result,
};
use crate::container::{CommandRunner, ContainerClient, OutputSink};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Metadata steps run on an existing image, followed by preparation.
#[derive(Clone)]
pub struct ImagePipeline {
    client: ContainerClient,
    metadata: MetadataExtractor,
    hooks: HookExecutor,
    preparer: Arc<dyn ImagePreparer>,
}

impl std::fmt::Debug for ImagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePipeline")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl ImagePipeline {
    pub fn new(client: ContainerClient, preparer: Arc<dyn ImagePreparer>) -> Self {
        let runner = CommandRunner::new(client.clone());
        Self {
            client,
            metadata: MetadataExtractor::new(runner.clone()),
            hooks: HookExecutor::new(runner),
            preparer,
        }
    }

    /// Read the Procfile and manifest from `image`, run its build hooks
    /// and prepare the result for deployment.
    ///
    /// Each step's container is removed before the next step starts.
    pub async fn run(&self, app: &App, image: &str, log: &OutputSink) -> Result<String> {
        let image = ImageReference::normalize(image);

        log.line("---- Getting process from image ----");
        let procfile = self.metadata.procfile(&image, log).await.finish().await?;

        log.line("---- Getting tsuru.yaml from image ----");
        let manifest = self.metadata.manifest(&image, log).await.finish().await?;

        let hooked = self
            .hooks
            .run(&image, manifest.as_ref(), log)
            .await
            .finish()
            .await?;
        let working = hooked.unwrap_or(image);

        let custom_data = manifest.as_ref().map(CustomData::from);
        let prepared = self
            .preparer
            .prepare(PrepareImageArgs {
                client: &self.client,
                app,
                procfile_raw: &procfile,
                image: &working,
                log,
                custom_data: custom_data.as_ref(),
            })
            .await?;
        info!("Prepared {} for {}", prepared, app.name);
        Ok(prepared)
    }
}

/// Builds application images through a container engine.
#[derive(Clone)]
pub struct DockerBuilder {
    resolver: Arc<ArchiveResolver>,
    pipeline: ImagePipeline,
    archive_builder: Arc<dyn ArchiveBuilder>,
}

impl std::fmt::Debug for DockerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerBuilder")
            .field("resolver", &self.resolver)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl DockerBuilder {
    pub fn new(
        resolver: ArchiveResolver,
        pipeline: ImagePipeline,
        archive_builder: Arc<dyn ArchiveBuilder>,
    ) -> Self {
        Self {
            resolver: Arc::new(resolver),
            pipeline,
            archive_builder,
        }
    }

    /// Build a deployable image for `app`; returns its reference.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Unsupported`] for Dockerfile builds,
    /// [`BuildError::NoValidSource`] when no source was given, and any
    /// error raised by the step that failed.
    pub async fn build(&self, app: &App, options: BuildOptions, log: &OutputSink) -> Result<String> {
        if options.build_from_file {
            return Err(BuildError::Unsupported(
                "build image from Dockerfile".to_string(),
            ));
        }
        info!("Building {} from {}", app.name, options.source.kind());

        match self.resolver.resolve(app, options.source, log).await? {
            ResolvedSource::Image(image) => self.pipeline.run(app, &image, log).await,
            ResolvedSource::Archive(archive) => {
                self.archive_builder
                    .build_from_archive(app, archive, options.tag.as_deref(), log)
                    .await
            }
        }
    }
}

#[async_trait]
impl Builder for DockerBuilder {
    async fn build(&self, app: &App, options: BuildOptions, log: &OutputSink) -> Result<String> {
        DockerBuilder::build(self, app, options, log).await
    }
}
