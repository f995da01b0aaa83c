use crate::limiter::{ActionLimiter, ActionPermit, LimitError};
use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Limiter whose accounting lives in a directory shared by every builder
/// process.
///
/// Each resource gets a JSON slot file guarded by an exclusive lock on a
/// sibling `.lock` file. Slots older than the TTL are dropped on the next
/// access so a crashed process cannot hold a resource forever. A live
/// holder renews its slot every third of the TTL, so long actions such as
/// image pulls keep their slot.
#[derive(Debug, Clone)]
pub struct SharedLimiter {
    dir: PathBuf,
    limit: u32,
    poll_interval: Duration,
    slot_ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlotEntry {
    id: String,
    acquired_at: u64,
}

/// A slot held in the shared store, released on drop.
#[derive(Debug)]
pub(crate) struct SharedSlot {
    dir: PathBuf,
    resource: String,
    id: String,
    renewal: JoinHandle<()>,
}

impl Drop for SharedSlot {
    fn drop(&mut self) {
        self.renewal.abort();

        let id = self.id.clone();
        let released = try_with_locked_slots(&self.dir, &self.resource, |slots| {
            slots.retain(|slot| slot.id != id);
        });
        match released {
            Ok(Some(())) => {}
            Ok(None) => {
                // Store is locked by someone else; wait for it off the runtime
                let dir = self.dir.clone();
                let resource = self.resource.clone();
                let id = self.id.clone();
                let release = move || {
                    if let Err(e) = with_locked_slots(&dir, &resource, |slots| {
                        slots.retain(|slot| slot.id != id);
                    }) {
                        warn!("Failed to release action slot for {}: {}", resource, e);
                    }
                };
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn_blocking(release);
                    }
                    Err(_) => release(),
                }
            }
            Err(e) => warn!("Failed to release action slot for {}: {}", self.resource, e),
        }
    }
}

impl SharedLimiter {
    pub fn new(dir: PathBuf, limit: u32) -> Self {
        Self {
            dir,
            limit,
            poll_interval: Duration::from_millis(250),
            slot_ttl: Duration::from_secs(300),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_slot_ttl(mut self, ttl: Duration) -> Self {
        self.slot_ttl = ttl;
        self
    }

    /// Number of live slots recorded for `resource`.
    pub fn in_use(&self, resource: &str) -> Result<usize, LimitError> {
        let ttl = self.slot_ttl;
        with_locked_slots(&self.dir, resource, |slots| {
            expire(slots, ttl);
            slots.len()
        })
    }

    fn try_take(&self, resource: &str) -> Result<Option<String>, LimitError> {
        let limit = self.limit as usize;
        let ttl = self.slot_ttl;
        with_locked_slots(&self.dir, resource, |slots| {
            expire(slots, ttl);
            if slots.len() >= limit {
                return None;
            }
            let id = uuid::Uuid::new_v4().to_string();
            slots.push(SlotEntry {
                id: id.clone(),
                acquired_at: now_secs(),
            });
            Some(id)
        })
    }
}

#[async_trait]
impl ActionLimiter for SharedLimiter {
    async fn acquire(&self, resource: &str) -> Result<ActionPermit, LimitError> {
        loop {
            let this = self.clone();
            let key = resource.to_string();
            let taken = tokio::task::spawn_blocking(move || this.try_take(&key))
                .await
                .map_err(|e| LimitError::Store(std::io::Error::other(e)))??;

            if let Some(id) = taken {
                let renewal = tokio::spawn(renew_slot(
                    self.dir.clone(),
                    resource.to_string(),
                    id.clone(),
                    renewal_interval(self.slot_ttl),
                ));
                return Ok(ActionPermit::shared(SharedSlot {
                    dir: self.dir.clone(),
                    resource: resource.to_string(),
                    id,
                    renewal,
                }));
            }

            debug!("Shared limiter saturated for {}, retrying", resource);
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn limit(&self) -> u32 {
        self.limit
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn expire(slots: &mut Vec<SlotEntry>, ttl: Duration) {
    let cutoff = now_secs().saturating_sub(ttl.as_secs());
    slots.retain(|slot| slot.acquired_at >= cutoff);
}

fn renewal_interval(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_secs(1))
}

/// Refresh the slot's timestamp until it is released.
async fn renew_slot(dir: PathBuf, resource: String, id: String, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let (d, r, i) = (dir.clone(), resource.clone(), id.clone());
        let renewed = tokio::task::spawn_blocking(move || {
            with_locked_slots(&d, &r, |slots| match slots.iter_mut().find(|slot| slot.id == i) {
                Some(slot) => {
                    slot.acquired_at = now_secs();
                    true
                }
                None => false,
            })
        })
        .await;
        match renewed {
            Ok(Ok(true)) => debug!("Renewed action slot {} for {}", id, resource),
            Ok(Ok(false)) => {
                warn!("Action slot {} for {} expired before renewal", id, resource);
                return;
            }
            Ok(Err(e)) => warn!("Failed to renew action slot for {}: {}", resource, e),
            Err(_) => return,
        }
    }
}

fn resource_stem(resource: &str) -> String {
    resource
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn open_lock(dir: &Path, resource: &str) -> Result<(File, PathBuf), LimitError> {
    fs::create_dir_all(dir)?;
    let stem = resource_stem(resource);
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(dir.join(format!("{}.lock", stem)))?;
    Ok((lock_file, dir.join(format!("{}.json", stem))))
}

fn with_locked_slots<R>(
    dir: &Path,
    resource: &str,
    f: impl FnOnce(&mut Vec<SlotEntry>) -> R,
) -> Result<R, LimitError> {
    let (lock_file, data_path) = open_lock(dir, resource)?;
    lock_file.lock_exclusive()?;
    update_slots(lock_file, &data_path, f)
}

/// Like [`with_locked_slots`], but returns `None` instead of waiting when
/// the store is locked.
fn try_with_locked_slots<R>(
    dir: &Path,
    resource: &str,
    f: impl FnOnce(&mut Vec<SlotEntry>) -> R,
) -> Result<Option<R>, LimitError> {
    let (lock_file, data_path) = open_lock(dir, resource)?;
    if let Err(e) = lock_file.try_lock_exclusive() {
        if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
            return Ok(None);
        }
        return Err(e.into());
    }
    update_slots(lock_file, &data_path, f).map(Some)
}

fn update_slots<R>(
    lock_file: File,
    data_path: &Path,
    f: impl FnOnce(&mut Vec<SlotEntry>) -> R,
) -> Result<R, LimitError> {
    let mut slots: Vec<SlotEntry> = match fs::read_to_string(data_path) {
        Ok(content) if !content.trim().is_empty() => serde_json::from_str(&content)?,
        Ok(_) => Vec::new(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    let result = f(&mut slots);
    fs::write(data_path, serde_json::to_vec(&slots)?)?;
    // Lock is released when lock_file is closed
    drop(lock_file);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_slot_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let limiter = SharedLimiter::new(dir.path().to_path_buf(), 2);

        let first = limiter.acquire("tcp://10.0.0.1:2375").await.unwrap();
        let second = limiter.acquire("tcp://10.0.0.1:2375").await.unwrap();
        assert_eq!(limiter.in_use("tcp://10.0.0.1:2375").unwrap(), 2);

        drop(first);
        assert_eq!(limiter.in_use("tcp://10.0.0.1:2375").unwrap(), 1);
        drop(second);
        assert_eq!(limiter.in_use("tcp://10.0.0.1:2375").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_two_limiters_share_accounting() {
        let dir = TempDir::new().unwrap();
        let a = SharedLimiter::new(dir.path().to_path_buf(), 1)
            .with_poll_interval(Duration::from_millis(10));
        let b = a.clone();

        let held = a.acquire("host").await.unwrap();
        let waiting = tokio::spawn(async move { b.acquire("host").await.map(|_| ()) });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!waiting.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .expect("waiter should get the slot")
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_expired_slots_are_dropped() {
        let dir = TempDir::new().unwrap();
        let limiter =
            SharedLimiter::new(dir.path().to_path_buf(), 1).with_slot_ttl(Duration::from_secs(60));

        with_locked_slots(dir.path(), "host", |slots| {
            slots.push(SlotEntry {
                id: "stale".to_string(),
                acquired_at: now_secs() - 3600,
            });
        })
        .unwrap();

        assert_eq!(limiter.in_use("host").unwrap(), 0);
        assert!(limiter.try_take("host").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_held_slot_outlives_ttl() {
        let dir = TempDir::new().unwrap();
        let limiter =
            SharedLimiter::new(dir.path().to_path_buf(), 1).with_slot_ttl(Duration::from_secs(2));

        let permit = limiter.acquire("host").await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(limiter.in_use("host").unwrap(), 1);
        assert!(limiter.try_take("host").unwrap().is_none());

        drop(permit);
        assert_eq!(limiter.in_use("host").unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_contended_release_does_not_block() {
        let dir = TempDir::new().unwrap();
        let limiter = SharedLimiter::new(dir.path().to_path_buf(), 1);
        let permit = limiter.acquire("host").await.unwrap();

        let (lock_file, _) = open_lock(dir.path(), "host").unwrap();
        lock_file.lock_exclusive().unwrap();

        let release = tokio::spawn(async move { drop(permit) });
        let dropped = tokio::time::timeout(Duration::from_millis(500), release).await;
        FileExt::unlock(&lock_file).unwrap();
        assert!(dropped.is_ok(), "release blocked on a held store lock");

        let mut in_use = 1;
        for _ in 0..50 {
            in_use = limiter.in_use("host").unwrap();
            if in_use == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(in_use, 0);
    }
}
