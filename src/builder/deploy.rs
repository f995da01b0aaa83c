//! Archive build procedure based on the platform deploy command.
//!
//! The application archive is copied into a container of the platform
//! image, the deploy command unpacks and sets it up, and the container is
//! committed as the application image. The result then goes through the
//! same metadata steps as any other image.

use crate::builder::collaborators::app_repository;
use crate::builder::{App, Archive, ArchiveBuilder, BuildError, ImagePipeline, Result};
use crate::container::{CommandRunner, CommitSpec, ContainerClient, CreateSpec, OutputSink};
use crate::env::{self, image::DEFAULT_TAG};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Deploy command settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Image providing the deploy tooling
    pub platform_image: String,
    /// Command unpacking and setting up the uploaded archive
    pub command: String,
    /// Registry prefixed to application repositories
    pub registry: Option<String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            platform_image: "tsuru/scratch:latest".to_string(),
            command: format!(
                "/var/lib/tsuru/deploy archive file://{}",
                env::archive_path()
            ),
            registry: None,
        }
    }
}

/// Wrap raw archive bytes in a tar stream holding a single
/// `archive.tar.gz` entry.
pub fn wrap_archive(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, env::ARCHIVE_NAME, data)?;
    builder.into_inner()
}

/// Default [`ArchiveBuilder`].
#[derive(Debug, Clone)]
pub struct DeployArchiveBuilder {
    runner: CommandRunner,
    config: DeployConfig,
    pipeline: ImagePipeline,
}

impl DeployArchiveBuilder {
    pub fn new(client: ContainerClient, config: DeployConfig, pipeline: ImagePipeline) -> Self {
        Self {
            runner: CommandRunner::new(client),
            config,
            pipeline,
        }
    }
}

#[async_trait]
impl ArchiveBuilder for DeployArchiveBuilder {
    async fn build_from_archive(
        &self,
        app: &App,
        archive: Archive,
        tag: Option<&str>,
        log: &OutputSink,
    ) -> Result<String> {
        let tar_wrapped = archive.is_tar_wrapped();
        let data = archive.read_to_end().await?;
        let upload = if tar_wrapped {
            data
        } else {
            wrap_archive(&data)?
        };
        debug!("Uploading {} byte archive for {}", upload.len(), app.name);

        log.line("---- Building application image ----");
        let spec = CreateSpec::shell(&self.config.platform_image, &self.config.command);
        let (container, result) = self
            .runner
            .run_with_upload(
                &spec,
                Some((env::APP_ROOT, upload)),
                log,
                log.clone(),
                Some(log.clone()),
            )
            .await
            .into_parts();
        if let Err(e) = result {
            container.release().await;
            return Err(BuildError::engine(
                format!("running deploy command in {}", self.config.platform_image),
                e,
            ));
        }

        let commit = CommitSpec {
            container: container.id().unwrap_or_default().to_string(),
            repository: app_repository(self.config.registry.as_deref(), app),
            tag: tag.unwrap_or(DEFAULT_TAG).to_string(),
        };
        let committed = self.runner.client().commit_container(&commit).await;
        container.release().await;
        let id = committed
            .map_err(|e| BuildError::engine(format!("committing image for {}", app.name), e))?;

        let image = format!("{}:{}", commit.repository, commit.tag);
        info!("Built {} ({}) from archive", image, id);
        log.line(format!(" ---> Built {}", image));

        self.pipeline.run(app, &image, log).await
    }
}
