//! Command line argument parsing
//!
//! This module handles CLI argument parsing with subcommands:
//! - `build`: Build a deployable image for an application
//! - `show-config`: Show configuration discovery information
//! - `init-config`: Write a default user configuration file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Build(BuildConfig),
    ShowConfig,
    InitConfig,
}

/// Source flags as given on the command line.
///
/// Several may be set at once; the build picks one by priority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceArgs {
    pub archive: Option<PathBuf>,
    pub rebuild: bool,
    pub url: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug)]
pub struct BuildConfig {
    pub app: String,
    pub source: SourceArgs,
    pub tag: Option<String>,
    pub dockerfile: bool,
    pub config_override: Option<PathBuf>,
    pub dry_run: bool,
    pub verbose: bool,
}

#[derive(Debug, Parser)]
#[command(name = "deploy-builder")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Builds deployable application images inside ephemeral containers")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build a deployable image for an application
    Build {
        /// Application name
        app: String,
        /// Source archive (tar.gz) to build from
        #[arg(long = "archive", value_name = "FILE")]
        archive: Option<PathBuf>,
        /// Rebuild from the archive kept in the application's last image
        #[arg(long = "rebuild")]
        rebuild: bool,
        /// Download the source archive from this URL
        #[arg(long = "url", value_name = "URL")]
        url: Option<String>,
        /// Run the metadata steps on an existing image
        #[arg(long = "image", value_name = "REF")]
        image: Option<String>,
        /// Tag for images built from archives
        #[arg(short = 't', long = "tag")]
        tag: Option<String>,
        /// Build from a Dockerfile
        #[arg(long = "dockerfile")]
        dockerfile: bool,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Run against a recording engine and print the engine calls
        #[arg(short = 'n', long = "dry-run")]
        dry_run: bool,
        /// Enable verbose output
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },
    /// Show configuration discovery information
    ShowConfig,
    /// Write a default configuration file in the user's home directory
    InitConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Build {
                app,
                archive,
                rebuild,
                url,
                image,
                tag,
                dockerfile,
                config,
                dry_run,
                verbose,
            }) => {
                if app.trim().is_empty() {
                    return Err("Application name must not be empty".to_string());
                }
                Ok(ExecutionMode::Build(BuildConfig {
                    app: app.clone(),
                    source: SourceArgs {
                        archive: archive.clone(),
                        rebuild: *rebuild,
                        url: url.clone(),
                        image: image.clone(),
                    },
                    tag: tag.clone(),
                    dockerfile: *dockerfile,
                    config_override: config.clone(),
                    dry_run: *dry_run,
                    verbose: *verbose,
                }))
            }
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            Some(Commands::InitConfig) => Ok(ExecutionMode::InitConfig),
            None => Err(
                "No command specified. Use 'deploy-builder --help' to see available commands."
                    .to_string(),
            ),
        }
    }
}
