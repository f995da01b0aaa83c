//! Per-resource throttling of engine-mutating actions.
//!
//! Every call that creates containers on a host acquires an [`ActionPermit`]
//! for that host first. The permit frees its slot when dropped.
//!
//! Three strategies are available:
//!
//! - [`NoopLimiter`]: no limit configured
//! - [`LocalLimiter`]: in-process accounting with one semaphore per resource
//! - [`SharedLimiter`]: accounting in a directory shared between processes
//!
//! The strategy is chosen once from [`LimitConfig`] by [`limiter_from_config`]
//! and handed to the components that need it.

mod local;
mod shared;

pub use local::LocalLimiter;
pub use shared::SharedLimiter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Limiter errors.
#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    /// Shared store could not be read or written
    #[error("Limiter store error: {0}")]
    Store(#[from] std::io::Error),

    /// Shared store holds data that cannot be decoded
    #[error("Limiter store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Limiter was shut down while waiting
    #[error("Limiter closed for resource {0}")]
    Closed(String),
}

/// Limiter strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitMode {
    /// Count actions inside this process
    #[default]
    Local,
    /// Count actions in a store shared by every builder process
    Global,
}

/// Action limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    pub mode: LimitMode,
    /// Maximum concurrent actions per resource; zero disables limiting
    pub actions_per_host: u32,
    /// Directory used by the global limiter
    pub shared_dir: PathBuf,
    /// Delay between attempts while the global limiter is saturated
    pub poll_interval_ms: u64,
    /// Age after which a global slot is considered abandoned. Holders renew
    /// their slot every third of this, so it bounds crash recovery and not
    /// the length of an action.
    pub slot_ttl_secs: u64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            mode: LimitMode::Local,
            actions_per_host: 0,
            shared_dir: std::env::temp_dir().join("deploy-builder-limits"),
            poll_interval_ms: 250,
            slot_ttl_secs: 300,
        }
    }
}

/// Bounds the number of concurrent actions against a resource.
#[async_trait]
pub trait ActionLimiter: Send + Sync {
    /// Wait until an action against `resource` is allowed.
    async fn acquire(&self, resource: &str) -> Result<ActionPermit, LimitError>;

    /// Configured cap, zero when unlimited.
    fn limit(&self) -> u32;
}

/// Grants one action slot; the slot is returned when the permit is dropped.
#[derive(Debug)]
pub struct ActionPermit {
    #[allow(dead_code)] // Held for its Drop
    inner: PermitInner,
}

#[derive(Debug)]
enum PermitInner {
    Unlimited,
    Local(tokio::sync::OwnedSemaphorePermit),
    Shared(shared::SharedSlot),
}

impl ActionPermit {
    /// Permit that does not account for anything.
    pub fn unlimited() -> Self {
        Self {
            inner: PermitInner::Unlimited,
        }
    }

    pub(crate) fn local(permit: tokio::sync::OwnedSemaphorePermit) -> Self {
        Self {
            inner: PermitInner::Local(permit),
        }
    }

    pub(crate) fn shared(slot: shared::SharedSlot) -> Self {
        Self {
            inner: PermitInner::Shared(slot),
        }
    }

    /// Whether this permit occupies a counted slot.
    pub fn is_limited(&self) -> bool {
        !matches!(self.inner, PermitInner::Unlimited)
    }
}

/// Limiter used when no cap is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLimiter;

#[async_trait]
impl ActionLimiter for NoopLimiter {
    async fn acquire(&self, _resource: &str) -> Result<ActionPermit, LimitError> {
        Ok(ActionPermit::unlimited())
    }

    fn limit(&self) -> u32 {
        0
    }
}

/// Build the limiter described by `config`.
pub fn limiter_from_config(config: &LimitConfig) -> Arc<dyn ActionLimiter> {
    if config.actions_per_host == 0 {
        info!("Action limiting disabled");
        return Arc::new(NoopLimiter);
    }

    match config.mode {
        LimitMode::Local => {
            info!(
                "Using local action limiter ({} actions per host)",
                config.actions_per_host
            );
            Arc::new(LocalLimiter::new(config.actions_per_host))
        }
        LimitMode::Global => {
            info!(
                "Using shared action limiter at {:?} ({} actions per host)",
                config.shared_dir, config.actions_per_host
            );
            Arc::new(
                SharedLimiter::new(config.shared_dir.clone(), config.actions_per_host)
                    .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
                    .with_slot_ttl(Duration::from_secs(config.slot_ttl_secs)),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_limit_is_noop() {
        let config = LimitConfig {
            mode: LimitMode::Global,
            actions_per_host: 0,
            ..Default::default()
        };
        let limiter = limiter_from_config(&config);
        assert_eq!(limiter.limit(), 0);

        let permit = limiter.acquire("host-a").await.unwrap();
        assert!(!permit.is_limited());
    }

    #[tokio::test]
    async fn test_local_mode_selected() {
        let config = LimitConfig {
            actions_per_host: 3,
            ..Default::default()
        };
        let limiter = limiter_from_config(&config);
        assert_eq!(limiter.limit(), 3);
        assert!(limiter.acquire("host-a").await.unwrap().is_limited());
    }

    #[test]
    fn test_mode_deserializes_lowercase() {
        let config: LimitConfig = toml::from_str("mode = \"global\"\nactions_per_host = 2").unwrap();
        assert_eq!(config.mode, LimitMode::Global);
        assert_eq!(config.actions_per_host, 2);
        assert_eq!(config.poll_interval_ms, 250);
    }
}
