//! Build options and the archive handle.

use crate::container::{ArchiveStream, ContainerGuard};
use futures::stream::{self, StreamExt};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Application source archive, read exactly once.
///
/// When the archive was exported from a container, the container rides
/// along and is removed once the archive has been consumed or closed.
pub struct Archive {
    pub name: String,
    pub size: Option<u64>,
    chunks: ArchiveStream,
    container: Option<ContainerGuard>,
    tar_wrapped: bool,
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("container", &self.container)
            .field("tar_wrapped", &self.tar_wrapped)
            .finish_non_exhaustive()
    }
}

impl Archive {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let size = Some(bytes.len() as u64);
        let mut archive = Self::from_stream(name, stream::iter(vec![Ok(bytes)]).boxed());
        archive.size = size;
        archive
    }

    pub fn from_stream(name: impl Into<String>, chunks: ArchiveStream) -> Self {
        Self {
            name: name.into(),
            size: None,
            chunks,
            container: None,
            tar_wrapped: false,
        }
    }

    /// Archive backed by any async reader, e.g. an opened file.
    pub fn from_reader<R>(name: impl Into<String>, reader: R, size: Option<u64>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let chunks = stream::unfold(Some(reader), |state| async move {
            let mut reader = state?;
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            match reader.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf), Some(reader)))
                }
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed();

        let mut archive = Self::from_stream(name, chunks);
        archive.size = size;
        archive
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach the container the archive is exported from.
    pub fn with_container(mut self, container: ContainerGuard) -> Self {
        self.container = Some(container);
        self
    }

    /// Mark the content as a tar stream wrapping the archive file, as
    /// produced by engine exports.
    pub fn tar_wrapped(mut self) -> Self {
        self.tar_wrapped = true;
        self
    }

    pub fn is_tar_wrapped(&self) -> bool {
        self.tar_wrapped
    }

    pub fn container(&self) -> Option<&ContainerGuard> {
        self.container.as_ref()
    }

    /// Consume the whole archive, then release its container.
    pub async fn read_to_end(mut self) -> std::io::Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut result = Ok(());
        while let Some(chunk) = self.chunks.next().await {
            match chunk {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.close().await;
        result.map(|()| data)
    }

    /// Drop the stream without reading it and release its container.
    pub async fn close(mut self) {
        if let Some(container) = self.container.take() {
            container.release().await;
        }
    }
}

/// Where the application source comes from.
#[derive(Debug, Default)]
pub enum BuildSource {
    /// Uploaded archive
    Archive(Archive),
    /// Archive stored in the application's previous builder image
    Rebuild,
    /// Archive downloaded over HTTP
    Url(String),
    /// Existing image to run the metadata steps on
    Image(String),
    #[default]
    None,
}

impl BuildSource {
    pub fn kind(&self) -> &'static str {
        match self {
            BuildSource::Archive(_) => "archive",
            BuildSource::Rebuild => "rebuild",
            BuildSource::Url(_) => "url",
            BuildSource::Image(_) => "image",
            BuildSource::None => "none",
        }
    }
}

/// Options for a single build.
#[derive(Debug, Default)]
pub struct BuildOptions {
    pub source: BuildSource,
    /// Tag for images built from archives; `latest` when unset
    pub tag: Option<String>,
    /// Build from a Dockerfile (not supported)
    pub build_from_file: bool,
}

impl BuildOptions {
    pub fn new(source: BuildSource) -> Self {
        Self {
            source,
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn from_dockerfile(mut self) -> Self {
        self.build_from_file = true;
        self
    }

    /// Pick one source from independently optional fields.
    ///
    /// Priority is archive, rebuild, URL, image. An archive whose declared
    /// size is zero does not count as provided; empty strings count as
    /// absent.
    pub fn from_fields(
        archive: Option<Archive>,
        rebuild: bool,
        url: Option<String>,
        image: Option<String>,
    ) -> Self {
        let archive = archive.filter(|a| a.size != Some(0));
        let url = url.filter(|u| !u.is_empty());
        let image = image.filter(|i| !i.is_empty());

        let source = if let Some(archive) = archive {
            BuildSource::Archive(archive)
        } else if rebuild {
            BuildSource::Rebuild
        } else if let Some(url) = url {
            BuildSource::Url(url)
        } else if let Some(image) = image {
            BuildSource::Image(image)
        } else {
            BuildSource::None
        };
        Self::new(source)
    }
}
