//! In-memory container engine.
//!
//! Simulates the engine protocol without a daemon: containers get
//! sequential IDs, attached output is released only once the container is
//! started, and every call is recorded. Used for dry runs and tests.

use crate::container::{
    ArchiveStream, Attachment, CommitSpec, ContainerEngine, ContainerError, CreateSpec,
    OutputSink, Result,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Engine operations, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Attach,
    Start,
    Remove,
    Commit,
    Download,
    Upload,
    Tag,
}

/// A recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Create(CreateSpec),
    Attach(String),
    Start(String),
    Remove { id: String, force: bool },
    Commit(CommitSpec),
    Download { id: String, path: String },
    Upload { id: String, path: String, size: usize },
    Tag { image: String, repository: String, tag: String },
}

#[derive(Debug, Clone)]
struct ScriptedOutput {
    pattern: String,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    calls: Vec<EngineCall>,
    containers: HashMap<String, CreateSpec>,
    pending_starts: HashMap<String, oneshot::Sender<()>>,
}

/// Scripted, recording engine.
#[derive(Default)]
pub struct MemoryEngine {
    outputs: Vec<ScriptedOutput>,
    files: HashMap<String, Vec<u8>>,
    failures: HashSet<Operation>,
    missing_images: HashSet<String>,
    state: Mutex<MemoryState>,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("failures", &self.failures)
            .field("missing_images", &self.missing_images)
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Containers whose command contains `pattern` print `stdout`.
    pub fn with_output(self, pattern: &str, stdout: impl Into<Vec<u8>>) -> Self {
        self.with_streams(pattern, stdout, Vec::new())
    }

    /// Containers whose command contains `pattern` print `stdout` and `stderr`.
    pub fn with_streams(
        mut self,
        pattern: &str,
        stdout: impl Into<Vec<u8>>,
        stderr: impl Into<Vec<u8>>,
    ) -> Self {
        self.outputs.push(ScriptedOutput {
            pattern: pattern.to_string(),
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
        self
    }

    /// Content returned when `path` is exported from any container.
    pub fn with_file(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.to_string(), content.into());
        self
    }

    /// Make every call of `operation` fail.
    pub fn fail_on(mut self, operation: Operation) -> Self {
        self.failures.insert(operation);
        self
    }

    /// Make container creation from `image` fail with not-found.
    pub fn without_image(mut self, image: &str) -> Self {
        self.missing_images.insert(image.to_string());
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Specs of every container creation attempt.
    pub fn created(&self) -> Vec<CreateSpec> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Create(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    /// IDs of every removal attempt.
    pub fn removed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Remove { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn commits(&self) -> Vec<CommitSpec> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Commit(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    /// Command strings of every created container.
    pub fn commands(&self) -> Vec<String> {
        self.created()
            .into_iter()
            .filter_map(|spec| spec.cmd.map(|cmd| cmd.join(" ")))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: EngineCall) {
        self.lock().calls.push(call);
    }

    fn check(&self, operation: Operation) -> Result<()> {
        if self.failures.contains(&operation) {
            return Err(ContainerError::Other(format!(
                "simulated {:?} failure",
                operation
            )));
        }
        Ok(())
    }

    fn output_for(&self, spec: &CreateSpec) -> Option<ScriptedOutput> {
        let command = spec.cmd.as_ref()?.join(" ");
        self.outputs
            .iter()
            .find(|out| command.contains(&out.pattern))
            .cloned()
    }
}

#[async_trait]
impl ContainerEngine for MemoryEngine {
    fn endpoint(&self) -> &str {
        "memory://"
    }

    async fn create_container(&self, spec: &CreateSpec, _log: &OutputSink) -> Result<String> {
        self.record(EngineCall::Create(spec.clone()));
        self.check(Operation::Create)?;
        if self.missing_images.contains(&spec.image) {
            return Err(ContainerError::NotFound(format!("image {}", spec.image)));
        }

        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("container-{}", state.next_id);
        state.containers.insert(id.clone(), spec.clone());
        Ok(id)
    }

    async fn attach_container(
        &self,
        id: &str,
        stdout: OutputSink,
        stderr: OutputSink,
    ) -> Result<Attachment> {
        self.record(EngineCall::Attach(id.to_string()));
        self.check(Operation::Attach)?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let (start_tx, start_rx) = oneshot::channel();
        let output = {
            let mut state = self.lock();
            let spec = state
                .containers
                .get(id)
                .cloned()
                .ok_or_else(|| ContainerError::NotFound(format!("container {}", id)))?;
            state.pending_starts.insert(id.to_string(), start_tx);
            self.output_for(&spec)
        };

        let drain = tokio::spawn(async move {
            if start_rx.await.is_err() {
                return Err(ContainerError::ExecutionError(
                    "container removed before start".to_string(),
                ));
            }
            if let Some(output) = output {
                stdout.write_bytes(&output.stdout)?;
                stderr.write_bytes(&output.stderr)?;
            }
            Ok(())
        });

        let _ = ready_tx.send(());
        Ok(Attachment::new(ready_rx, drain))
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.record(EngineCall::Start(id.to_string()));
        self.check(Operation::Start)?;
        if let Some(tx) = self.lock().pending_starts.remove(id) {
            let _ = tx.send(());
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        self.record(EngineCall::Remove {
            id: id.to_string(),
            force,
        });
        self.check(Operation::Remove)?;
        let mut state = self.lock();
        state.pending_starts.remove(id);
        state
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ContainerError::NotFound(format!("container {}", id)))
    }

    async fn commit_container(&self, spec: &CommitSpec) -> Result<String> {
        self.record(EngineCall::Commit(spec.clone()));
        self.check(Operation::Commit)?;
        let n = self.lock().calls.len();
        Ok(format!("sha256:{:064x}", n))
    }

    async fn download_from_container(&self, id: &str, path: &str) -> Result<ArchiveStream> {
        self.record(EngineCall::Download {
            id: id.to_string(),
            path: path.to_string(),
        });
        self.check(Operation::Download)?;
        let content = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| ContainerError::NotFound(format!("{} in {}", path, id)))?;
        Ok(Box::pin(futures::stream::iter(vec![Ok(content)])))
    }

    async fn upload_to_container(&self, id: &str, path: &str, tar: Vec<u8>) -> Result<()> {
        self.record(EngineCall::Upload {
            id: id.to_string(),
            path: path.to_string(),
            size: tar.len(),
        });
        self.check(Operation::Upload)
    }

    async fn tag_image(&self, image: &str, repository: &str, tag: &str) -> Result<()> {
        self.record(EngineCall::Tag {
            image: image.to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
        });
        self.check(Operation::Tag)
    }
}
