//! Build source resolution.
//!
//! Turns a [`BuildSource`] into either an archive for the archive build
//! procedure or an image reference for the image pipeline.

use crate::builder::{App, Archive, BuildError, BuildSource, ImageNameResolver, Result};
use crate::container::{ContainerClient, ContainerGuard, CreateSpec, OutputSink};
use crate::env;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// HTTP settings for archive downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub connect_timeout_secs: u64,
    /// Overall transfer timeout
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            timeout_secs: 300,
        }
    }
}

/// What the pipeline builds from.
#[derive(Debug)]
pub enum ResolvedSource {
    Archive(Archive),
    Image(String),
}

/// Resolves build sources into archives or image references.
pub struct ArchiveResolver {
    client: ContainerClient,
    names: Arc<dyn ImageNameResolver>,
    http: reqwest::Client,
}

impl std::fmt::Debug for ArchiveResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveResolver")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl ArchiveResolver {
    pub fn new(
        client: ContainerClient,
        names: Arc<dyn ImageNameResolver>,
        download: &DownloadConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(download.connect_timeout_secs))
            .timeout(Duration::from_secs(download.timeout_secs))
            .build()
            .map_err(BuildError::HttpClient)?;
        Ok(Self {
            client,
            names,
            http,
        })
    }

    pub async fn resolve(
        &self,
        app: &App,
        source: BuildSource,
        log: &OutputSink,
    ) -> Result<ResolvedSource> {
        match source {
            BuildSource::Archive(archive) => Ok(ResolvedSource::Archive(
                archive.named(env::ARCHIVE_NAME),
            )),
            BuildSource::Rebuild => self.from_previous_build(app, log).await,
            BuildSource::Url(url) => self.download(&url).await.map(ResolvedSource::Archive),
            BuildSource::Image(image) => Ok(ResolvedSource::Image(image)),
            BuildSource::None => Err(BuildError::NoValidSource),
        }
    }

    /// Export the archive kept in the app's current builder image.
    ///
    /// The exporting container stays alive until the returned archive is
    /// consumed or closed.
    async fn from_previous_build(&self, app: &App, log: &OutputSink) -> Result<ResolvedSource> {
        let image = self.names.builder_image(app).await.map_err(|e| {
            debug!("Builder image lookup for {} failed: {}", app.name, e);
            BuildError::NotFound(format!("App {} image not found", app.name))
        })?;
        info!("Rebuilding {} from {}", app.name, image);

        let id = self
            .client
            .create_container(&CreateSpec::from_image(&image), log)
            .await
            .map_err(|e| {
                BuildError::engine(format!("creating rebuild container for {}", app.name), e)
            })?;
        let container = ContainerGuard::new(self.client.clone(), id.as_str());

        match self
            .client
            .download_from_container(&id, &env::archive_path())
            .await
        {
            Ok(chunks) => Ok(ResolvedSource::Archive(
                Archive::from_stream(env::ARCHIVE_NAME, chunks)
                    .tar_wrapped()
                    .with_container(container),
            )),
            Err(e) => {
                debug!("Archive export from {} failed: {}", id, e);
                container.release().await;
                Err(BuildError::NotFound(format!(
                    "App {} raw image not found",
                    app.name
                )))
            }
        }
    }

    async fn download(&self, raw_url: &str) -> Result<Archive> {
        let url = url::Url::parse(raw_url).map_err(|source| BuildError::InvalidUrl {
            url: raw_url.to_string(),
            source,
        })?;
        info!("Downloading archive from {}", url);

        let download_error = |source| BuildError::Download {
            url: raw_url.to_string(),
            source,
        };
        let response = self.http.get(url).send().await.map_err(download_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(BuildError::HttpStatus {
                url: raw_url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(download_error)?;
        if body.is_empty() {
            return Err(BuildError::EmptyArchive);
        }
        debug!("Downloaded {} bytes from {}", body.len(), raw_url);
        Ok(Archive::from_bytes(env::ARCHIVE_NAME, body.to_vec()))
    }
}
