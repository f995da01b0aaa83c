//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Explicit path given with `--config`
//! 2. Current directory: ./deploy-builder.toml
//! 3. User config: ~/.deploy-builder/config.toml
//! 4. System config: /etc/deploy-builder/config.toml
//! 5. Built-in defaults

use crate::builder::{DeployConfig, DownloadConfig};
use crate::container::EngineConfig;
use crate::env;
use crate::limiter::LimitConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("could not determine home directory")]
    NoHomeDir,
}

/// Complete builder configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Container engine connection
    pub docker: EngineConfig,
    /// Concurrent container actions per engine host
    pub limit: LimitConfig,
    /// Archive downloads
    pub download: DownloadConfig,
    /// Archive build procedure
    pub deploy: DeployConfig,
    /// Last builder image of each application, used for rebuilds
    pub apps: BTreeMap<String, String>,
}

impl BuilderConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load the explicit file when given, otherwise discover one using the
    /// hierarchy.
    pub fn discover_config(explicit: Option<&Path>) -> Result<BuilderConfig, ConfigError> {
        if let Some(path) = explicit {
            info!("Loading configuration override from: {:?}", path);
            return BuilderConfig::from_toml_file(path);
        }

        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return BuilderConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(BuilderConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        Self::first_existing(Self::get_config_candidates())
    }

    fn first_existing(candidates: Vec<PathBuf>) -> Option<PathBuf> {
        for candidate in candidates {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Get list of configuration file candidates in priority order
    fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(current_dir.join(env::LOCAL_CONFIG_FILE_NAME));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(env::system_config_file_path());

        candidates
    }

    /// Get home directory path
    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Create a default config file in the user's home directory
    pub fn create_default_user_config() -> Result<PathBuf, ConfigError> {
        let home_dir = Self::get_home_dir().ok_or(ConfigError::NoHomeDir)?;
        Self::create_default_config_in(&home_dir)
    }

    fn create_default_config_in(home_dir: &Path) -> Result<PathBuf, ConfigError> {
        let config_dir = env::user_config_dir_path(home_dir);
        let config_path = env::user_config_file_path(home_dir);

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).map_err(|source| ConfigError::Io {
                path: config_dir.clone(),
                source,
            })?;
            info!("Created configuration directory: {:?}", config_dir);
        }

        if !config_path.exists() {
            BuilderConfig::default().to_toml_file(&config_path)?;
            info!("Created default configuration file: {:?}", config_path);
        } else {
            warn!("Configuration file already exists: {:?}", config_path);
        }

        Ok(config_path)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        let candidates = Self::get_config_candidates();
        for (i, candidate) in candidates.iter().enumerate() {
            let status = if candidate.exists() {
                if candidate.is_file() {
                    "EXISTS"
                } else {
                    "NOT A FILE"
                }
            } else {
                "NOT FOUND"
            };

            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        if let Some(found) = Self::find_config_file() {
            println!("Active configuration: {:?}", found);
        } else {
            println!("Active configuration: Built-in defaults");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::LimitMode;
    use tempfile::TempDir;

    #[test]
    fn test_config_serialization() {
        let config = BuilderConfig::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: BuilderConfig = toml::from_str(&toml_string).unwrap();
        assert_eq!(deserialized.download.timeout_secs, 300);
        assert_eq!(deserialized.deploy, config.deploy);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: BuilderConfig = toml::from_str(
            r#"
            [limit]
            mode = "global"
            actions_per_host = 3

            [deploy]
            registry = "registry.example.com:5000"

            [apps]
            web = "registry.example.com:5000/app-web:v12"
            "#,
        )
        .unwrap();

        assert_eq!(config.limit.mode, LimitMode::Global);
        assert_eq!(config.limit.actions_per_host, 3);
        assert_eq!(config.download.connect_timeout_secs, 5);
        assert_eq!(
            config.deploy.registry.as_deref(),
            Some("registry.example.com:5000")
        );
        assert_eq!(
            config.deploy.command,
            DeployConfig::default().command
        );
        assert_eq!(config.apps["web"], "registry.example.com:5000/app-web:v12");
        assert!(config.docker.host.is_none());
    }

    #[test]
    fn test_config_file_operations() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        let mut original = BuilderConfig::default();
        original.apps.insert("web".to_string(), "app-web:v1".to_string());
        original.to_toml_file(&config_path).unwrap();

        let loaded = BuilderConfig::from_toml_file(&config_path).unwrap();
        assert_eq!(loaded.apps, original.apps);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("broken.toml");
        fs::write(&config_path, "[limit\nmode =").unwrap();

        let err = BuilderConfig::from_toml_file(&config_path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_explicit_config_wins() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("explicit.toml");
        fs::write(&config_path, "[limit]\nactions_per_host = 9\n").unwrap();

        let config = ConfigDiscovery::discover_config(Some(&config_path)).unwrap();
        assert_eq!(config.limit.actions_per_host, 9);

        let missing = temp_dir.path().join("missing.toml");
        assert!(matches!(
            ConfigDiscovery::discover_config(Some(&missing)),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_first_existing_candidate() {
        let temp_dir = TempDir::new().unwrap();
        let present = temp_dir.path().join("b.toml");
        fs::write(&present, "").unwrap();

        let found = ConfigDiscovery::first_existing(vec![
            temp_dir.path().join("a.toml"),
            present.clone(),
            temp_dir.path().to_path_buf(),
        ]);
        assert_eq!(found, Some(present));
    }

    #[test]
    fn test_create_default_config() {
        let home = TempDir::new().unwrap();
        let path = ConfigDiscovery::create_default_config_in(home.path()).unwrap();

        assert_eq!(path, home.path().join(".deploy-builder").join("config.toml"));
        let loaded = BuilderConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded.deploy, DeployConfig::default());

        // Existing files are left alone
        fs::write(&path, "[limit]\nactions_per_host = 2\n").unwrap();
        ConfigDiscovery::create_default_config_in(home.path()).unwrap();
        let kept = BuilderConfig::from_toml_file(&path).unwrap();
        assert_eq!(kept.limit.actions_per_host, 2);
    }

    #[test]
    fn test_config_candidates() {
        let candidates = ConfigDiscovery::get_config_candidates();

        assert!(!candidates.is_empty());
        assert_eq!(candidates[0].file_name().unwrap(), "deploy-builder.toml");
    }
}
