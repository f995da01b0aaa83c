use crate::limiter::{ActionLimiter, ActionPermit, LimitError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// In-process limiter keeping one semaphore per resource.
#[derive(Debug)]
pub struct LocalLimiter {
    limit: u32,
    resources: DashMap<String, Arc<Semaphore>>,
}

impl LocalLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            resources: DashMap::new(),
        }
    }

    fn semaphore(&self, resource: &str) -> Arc<Semaphore> {
        self.resources
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.limit as usize)))
            .clone()
    }

    /// Slots currently free for `resource`.
    pub fn available(&self, resource: &str) -> usize {
        self.resources
            .get(resource)
            .map(|sem| sem.available_permits())
            .unwrap_or(self.limit as usize)
    }
}

#[async_trait]
impl ActionLimiter for LocalLimiter {
    async fn acquire(&self, resource: &str) -> Result<ActionPermit, LimitError> {
        let semaphore = self.semaphore(resource);
        if semaphore.available_permits() == 0 {
            debug!("Waiting for an action slot on {}", resource);
        }
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| LimitError::Closed(resource.to_string()))?;
        Ok(ActionPermit::local(permit))
    }

    fn limit(&self) -> u32 {
        self.limit
    }
}
