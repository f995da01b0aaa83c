//! CLI-specific functionality for the deploy builder
//!
//! This module contains all CLI-related code including argument parsing
//! and configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, BuildConfig, ExecutionMode, SourceArgs};
pub use config::{BuilderConfig, ConfigDiscovery, ConfigError};
