//! Build metadata read from inside an image: the Procfile and the
//! application manifest.

use crate::builder::{BuildError, Result, StepOutcome};
use crate::container::{CommandRunner, OutputSink, SharedBuffer};
use crate::env::{self, image};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use tracing::debug;

/// Hooks declared in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hooks {
    /// Commands run once at build time, in order
    #[serde(default, deserialize_with = "null_as_default")]
    pub build: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<Value>,
}

/// Parsed application manifest. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestData {
    #[serde(default)]
    pub healthcheck: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hooks: Hooks,
}

impl ManifestData {
    pub fn has_build_hooks(&self) -> bool {
        !self.hooks.build.is_empty()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Manifest fields forwarded verbatim to image preparation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomData {
    pub healthcheck: Option<Value>,
    pub hooks: Hooks,
}

impl From<&ManifestData> for CustomData {
    fn from(manifest: &ManifestData) -> Self {
        Self {
            healthcheck: manifest.healthcheck.clone(),
            hooks: manifest.hooks.clone(),
        }
    }
}

/// Parse manifest bytes. Blank input means no manifest.
pub fn parse_manifest(image: &str, raw: &[u8]) -> Result<Option<ManifestData>> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: Value = serde_yaml::from_slice(raw).map_err(|source| BuildError::Manifest {
        image: image.to_string(),
        source,
    })?;
    if value.is_null() {
        return Ok(None);
    }
    serde_yaml::from_value(value)
        .map(Some)
        .map_err(|source| BuildError::Manifest {
            image: image.to_string(),
            source,
        })
}

/// Command printing the first Procfile found in an image.
pub fn procfile_command() -> String {
    env::first_existing_file_command(image::PROCFILE_CANDIDATES)
}

/// Command printing the first manifest found in the app's current directory.
pub fn manifest_command() -> String {
    let dir = env::current_dir();
    env::first_existing_file_command(
        image::MANIFEST_NAMES
            .iter()
            .map(|name| format!("{}/{}", dir, name)),
    )
}

/// Reads build metadata by running `cat` commands in throwaway containers.
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    runner: CommandRunner,
}

impl MetadataExtractor {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    /// Raw Procfile content; empty when the image has none.
    pub async fn procfile(&self, image: &str, log: &OutputSink) -> StepOutcome<String> {
        let output = SharedBuffer::default();
        let (container, result) = self
            .runner
            .run(image, &procfile_command(), log, OutputSink::new(output.clone()), None)
            .await
            .into_parts();

        let result = result
            .map(|()| output.to_string_lossy())
            .map_err(|e| BuildError::engine(format!("reading Procfile from {}", image), e));
        StepOutcome { container, result }
    }

    /// Parsed manifest, `None` when the image has none.
    pub async fn manifest(
        &self,
        image: &str,
        log: &OutputSink,
    ) -> StepOutcome<Option<ManifestData>> {
        let output = SharedBuffer::default();
        let (container, result) = self
            .runner
            .run(image, &manifest_command(), log, OutputSink::new(output.clone()), None)
            .await
            .into_parts();

        let result = result
            .map_err(|e| BuildError::engine(format!("reading manifest from {}", image), e))
            .and_then(|()| parse_manifest(image, &output.contents()));
        if let Ok(Some(manifest)) = &result {
            debug!(
                "Manifest of {} declares {} build hook(s)",
                image,
                manifest.hooks.build.len()
            );
        }
        StepOutcome { container, result }
    }
}
