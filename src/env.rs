//! Environment constants and path utilities for the deploy builder.
//!
//! This module centralizes the fixed paths and file names the build
//! pipeline relies on inside application images.

/// Root of the application tree inside platform images
pub const APP_ROOT: &str = "/home/application";

/// File name given to uploaded source archives
pub const ARCHIVE_NAME: &str = "archive.tar.gz";

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration directory name (hidden directory under $HOME)
pub const CONFIG_DIR_NAME: &str = ".deploy-builder";

/// Local configuration file name looked up in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "deploy-builder.toml";

/// Shell used to run commands inside build containers
pub const SHELL_ENTRYPOINT: [&str; 2] = ["/bin/sh", "-c"];

/// Image metadata locations
pub mod image {
    /// Procfile candidates, in lookup order
    pub const PROCFILE_CANDIDATES: [&str; 3] = [
        "/home/application/current/Procfile",
        "/app/user/Procfile",
        "/Procfile",
    ];

    /// Manifest file names looked up under `<app root>/current`, in order
    pub const MANIFEST_NAMES: [&str; 4] = ["tsuru.yml", "tsuru.yaml", "app.yml", "app.yaml"];

    /// Tag used when an image reference carries none
    pub const DEFAULT_TAG: &str = "latest";
}

use std::path::{Path, PathBuf};

/// Full path of the source archive inside the application root
pub fn archive_path() -> String {
    format!("{}/{}", APP_ROOT, ARCHIVE_NAME)
}

/// Directory holding the deployed application inside the image
pub fn current_dir() -> String {
    format!("{}/current", APP_ROOT)
}

/// System-wide configuration directory (Unix-like systems)
pub const SYSTEM_CONFIG_DIR: &str = "/etc/deploy-builder";

/// Build the user configuration directory path from a home directory
pub fn user_config_dir_path(home: &Path) -> PathBuf {
    home.join(CONFIG_DIR_NAME)
}

/// Build the user configuration file path from a home directory
pub fn user_config_file_path(home: &Path) -> PathBuf {
    user_config_dir_path(home).join(CONFIG_FILE_NAME)
}

/// System-wide configuration file path
pub fn system_config_file_path() -> PathBuf {
    Path::new(SYSTEM_CONFIG_DIR).join(CONFIG_FILE_NAME)
}

/// Build a shell command that prints the first readable file among
/// `candidates`, succeeding with empty output when none exists.
pub fn first_existing_file_command<I, S>(candidates: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let cats: Vec<String> = candidates
        .into_iter()
        .map(|path| format!("cat {}", path.as_ref()))
        .collect();
    format!("({} || true) 2>/dev/null", cats.join(" || "))
}
