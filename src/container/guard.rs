//! Scoped ownership of ephemeral containers.

use crate::container::ContainerClient;
use tracing::{debug, warn};

/// Owns an ephemeral container and force-removes it exactly once.
///
/// Call [`ContainerGuard::release`] on the normal path. A guard dropped
/// without being released schedules the removal on the current tokio
/// runtime. Removal failures are logged and never returned.
#[derive(Debug)]
pub struct ContainerGuard {
    client: ContainerClient,
    id: Option<String>,
}

impl ContainerGuard {
    /// Guard `id`. An empty ID yields an empty guard.
    pub fn new(client: ContainerClient, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            client,
            id: (!id.is_empty()).then_some(id),
        }
    }

    /// Guard that owns nothing.
    pub fn empty(client: ContainerClient) -> Self {
        Self { client, id: None }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none()
    }

    /// Force-remove the container now.
    pub async fn release(mut self) {
        if let Some(id) = self.id.take() {
            remove(&self.client, &id).await;
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let client = self.client.clone();
                handle.spawn(async move { remove(&client, &id).await });
            }
            Err(_) => warn!("No runtime available to remove container {}", id),
        }
    }
}

async fn remove(client: &ContainerClient, id: &str) {
    match client.remove_container(id, true).await {
        Ok(()) => debug!("Removed container {}", id),
        Err(e) => warn!("Failed to remove container {}: {}", id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{EngineCall, MemoryEngine, Operation};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_release_removes_once() {
        let engine = Arc::new(MemoryEngine::new());
        let client = ContainerClient::unlimited(engine.clone());

        let guard = ContainerGuard::new(client, "c1");
        assert_eq!(guard.id(), Some("c1"));
        guard.release().await;

        assert_eq!(engine.removed(), vec!["c1".to_string()]);
        assert!(engine.calls().contains(&EngineCall::Remove {
            id: "c1".to_string(),
            force: true
        }));
    }

    #[tokio::test]
    async fn test_empty_id_is_noop() {
        let engine = Arc::new(MemoryEngine::new());
        let client = ContainerClient::unlimited(engine.clone());

        ContainerGuard::new(client.clone(), "").release().await;
        ContainerGuard::empty(client.clone()).release().await;
        client.remove_container("", true).await.unwrap();

        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_remove_failure_is_swallowed() {
        let engine = Arc::new(MemoryEngine::new().fail_on(Operation::Remove));
        let client = ContainerClient::unlimited(engine.clone());

        ContainerGuard::new(client, "c1").release().await;
        assert_eq!(engine.removed(), vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn test_drop_schedules_removal() {
        let engine = Arc::new(MemoryEngine::new());
        let client = ContainerClient::unlimited(engine.clone());

        drop(ContainerGuard::new(client, "c2"));
        for _ in 0..10 {
            if !engine.removed().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(engine.removed(), vec!["c2".to_string()]);
    }
}
