//! Pluggable steps around the build pipeline and their default
//! implementations.

use crate::builder::{App, Archive, BuildError, CustomData, Result};
use crate::container::{ContainerClient, OutputSink};
use crate::env::image::DEFAULT_TAG;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Looks up the image an application was last built into.
#[async_trait]
pub trait ImageNameResolver: Send + Sync {
    async fn builder_image(&self, app: &App) -> Result<String>;
}

/// Fixed application to image table.
#[derive(Debug, Clone, Default)]
pub struct StaticImageNames {
    images: HashMap<String, String>,
}

impl StaticImageNames {
    pub fn with_image(mut self, app: impl Into<String>, image: impl Into<String>) -> Self {
        self.images.insert(app.into(), image.into());
        self
    }
}

impl From<BTreeMap<String, String>> for StaticImageNames {
    fn from(images: BTreeMap<String, String>) -> Self {
        Self {
            images: images.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ImageNameResolver for StaticImageNames {
    async fn builder_image(&self, app: &App) -> Result<String> {
        self.images
            .get(&app.name)
            .cloned()
            .ok_or_else(|| BuildError::NotFound(format!("no image recorded for app {}", app.name)))
    }
}

/// Inputs handed to an [`ImagePreparer`].
#[derive(Debug, Clone, Copy)]
pub struct PrepareImageArgs<'a> {
    pub client: &'a ContainerClient,
    pub app: &'a App,
    /// Procfile content as read from the image, possibly empty
    pub procfile_raw: &'a str,
    /// Image to prepare: the hook output when hooks ran, else the source image
    pub image: &'a str,
    pub log: &'a OutputSink,
    pub custom_data: Option<&'a CustomData>,
}

/// Final step turning a built image into a deployable one.
#[async_trait]
pub trait ImagePreparer: Send + Sync {
    /// Returns the deployable image reference.
    async fn prepare(&self, args: PrepareImageArgs<'_>) -> Result<String>;
}

/// Builds an image from an application archive.
#[async_trait]
pub trait ArchiveBuilder: Send + Sync {
    async fn build_from_archive(
        &self,
        app: &App,
        archive: Archive,
        tag: Option<&str>,
        log: &OutputSink,
    ) -> Result<String>;
}

/// Repository name for an application's images.
pub fn app_repository(registry: Option<&str>, app: &App) -> String {
    match registry.map(|r| r.trim_end_matches('/')).filter(|r| !r.is_empty()) {
        Some(registry) => format!("{}/app-{}", registry, app.name),
        None => format!("app-{}", app.name),
    }
}

/// Parse `name: command` Procfile lines, skipping blanks and comments.
pub fn parse_procfile(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(name, command)| (name.trim().to_string(), command.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

/// Tags the working image into the application's repository.
#[derive(Debug, Clone, Default)]
pub struct TaggingPreparer {
    registry: Option<String>,
    tag: Option<String>,
}

impl TaggingPreparer {
    pub fn new(registry: Option<String>) -> Self {
        Self {
            registry,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

#[async_trait]
impl ImagePreparer for TaggingPreparer {
    async fn prepare(&self, args: PrepareImageArgs<'_>) -> Result<String> {
        let repository = app_repository(self.registry.as_deref(), args.app);
        let tag = self.tag.as_deref().unwrap_or(DEFAULT_TAG);

        let processes = parse_procfile(args.procfile_raw);
        if processes.is_empty() {
            args.log.line(" ---> No processes declared");
        }
        for (name, command) in &processes {
            args.log
                .line(format!(" ---> Process {:?} found with command: {:?}", name, command));
        }

        if let Some(custom_data) = args.custom_data {
            let json = serde_json::to_string(custom_data).map_err(|e| BuildError::Preparation {
                app: args.app.name.clone(),
                message: format!("invalid custom data: {}", e),
            })?;
            debug!("Custom data for {}: {}", args.app.name, json);
            args.log.line(format!(" ---> Custom data: {}", json));
        }

        args.client
            .tag_image(args.image, &repository, tag)
            .await
            .map_err(|e| BuildError::engine(format!("tagging {} as {}", args.image, repository), e))?;

        let reference = format!("{}:{}", repository, tag);
        args.log.line(format!(" ---> Image {} ready", reference));
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Hooks;
    use crate::container::{EngineCall, MemoryEngine, SharedBuffer};
    use std::sync::Arc;

    #[test]
    fn test_app_repository() {
        let app = App::new("web");
        assert_eq!(app_repository(None, &app), "app-web");
        assert_eq!(app_repository(Some(""), &app), "app-web");
        assert_eq!(
            app_repository(Some("registry:5000/"), &app),
            "registry:5000/app-web"
        );
    }

    #[test]
    fn test_parse_procfile() {
        let raw = "web: ./server --port $PORT\n\n# comment\nworker:python worker.py\ngarbage\n";
        assert_eq!(
            parse_procfile(raw),
            vec![
                ("web".to_string(), "./server --port $PORT".to_string()),
                ("worker".to_string(), "python worker.py".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_static_names() {
        let names = StaticImageNames::default().with_image("web", "app-web:v4");
        assert_eq!(names.builder_image(&App::new("web")).await.unwrap(), "app-web:v4");
        assert!(matches!(
            names.builder_image(&App::new("api")).await,
            Err(BuildError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tagging_preparer() {
        let engine = Arc::new(MemoryEngine::new());
        let client = ContainerClient::unlimited(engine.clone());
        let app = App::new("web");
        let buffer = SharedBuffer::default();
        let log = OutputSink::new(buffer.clone());
        let custom = CustomData {
            healthcheck: None,
            hooks: Hooks {
                build: vec!["make".to_string()],
                restart: None,
            },
        };

        let image = TaggingPreparer::new(Some("registry:5000".to_string()))
            .prepare(PrepareImageArgs {
                client: &client,
                app: &app,
                procfile_raw: "web: ./run\n",
                image: "sha256:abc",
                log: &log,
                custom_data: Some(&custom),
            })
            .await
            .unwrap();

        assert_eq!(image, "registry:5000/app-web:latest");
        assert_eq!(
            engine.calls(),
            vec![EngineCall::Tag {
                image: "sha256:abc".to_string(),
                repository: "registry:5000/app-web".to_string(),
                tag: "latest".to_string(),
            }]
        );
        let output = buffer.to_string_lossy();
        assert!(output.contains("Process \"web\" found with command: \"./run\""));
        assert!(output.contains(r#"Custom data: {"healthcheck":null,"hooks":{"build":["make"]}}"#));
    }
}
