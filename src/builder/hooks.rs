//! Build hook execution.

use crate::builder::{BuildError, ImageReference, ManifestData, StepOutcome};
use crate::container::{CommandRunner, CommitSpec, ContainerGuard, OutputSink};
use tracing::info;

/// Join build hooks into one shell command.
pub fn build_hook_command(hooks: &[String]) -> String {
    hooks.join(" && ")
}

/// Runs a manifest's build hooks and commits the result over the source
/// image reference.
#[derive(Debug, Clone)]
pub struct HookExecutor {
    runner: CommandRunner,
}

impl HookExecutor {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    /// Run the build hooks of `manifest` on `image`.
    ///
    /// Yields `None` without touching the engine when there is nothing to
    /// run; otherwise the ID of the committed image.
    pub async fn run(
        &self,
        image: &str,
        manifest: Option<&ManifestData>,
        log: &OutputSink,
    ) -> StepOutcome<Option<String>> {
        let client = self.runner.client().clone();
        let Some(manifest) = manifest.filter(|m| m.has_build_hooks()) else {
            return StepOutcome {
                container: ContainerGuard::empty(client),
                result: Ok(None),
            };
        };

        let command = build_hook_command(&manifest.hooks.build);
        log.line("---- Running build hooks ----");
        log.line(format!(" ---> Running {:?}", command));

        let (container, result) = self
            .runner
            .run(image, &command, log, log.clone(), Some(log.clone()))
            .await
            .into_parts();
        if let Err(e) = result {
            return StepOutcome {
                container,
                result: Err(BuildError::engine(
                    format!("running build hooks in {}", image),
                    e,
                )),
            };
        }

        let reference = ImageReference::parse(image);
        let spec = CommitSpec {
            container: container.id().unwrap_or_default().to_string(),
            repository: reference.repository,
            tag: reference.tag,
        };
        let result = self
            .runner
            .client()
            .commit_container(&spec)
            .await
            .map(|id| {
                info!("Build hooks committed {} as {}", image, id);
                Some(id)
            })
            .map_err(|e| BuildError::engine(format!("committing build hooks of {}", image), e));
        StepOutcome { container, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Hooks;
    use crate::container::{ContainerClient, EngineCall, MemoryEngine, Operation, SharedBuffer};
    use std::sync::Arc;

    fn executor(engine: &Arc<MemoryEngine>) -> HookExecutor {
        HookExecutor::new(CommandRunner::new(ContainerClient::unlimited(engine.clone())))
    }

    fn manifest(build: &[&str]) -> ManifestData {
        ManifestData {
            hooks: Hooks {
                build: build.iter().map(|s| s.to_string()).collect(),
                restart: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_build_hook_command() {
        let hooks = vec!["echo a".to_string(), "echo b".to_string()];
        assert_eq!(build_hook_command(&hooks), "echo a && echo b");
        assert_eq!(build_hook_command(&hooks[..1]), "echo a");
    }

    #[tokio::test]
    async fn test_no_hooks_touches_nothing() {
        let engine = Arc::new(MemoryEngine::new());
        let log = OutputSink::discard();

        let outcome = executor(&engine).run("img", None, &log).await;
        assert!(outcome.container.is_empty());
        assert_eq!(outcome.finish().await.unwrap(), None);

        let empty = manifest(&[]);
        let outcome = executor(&engine).run("img", Some(&empty), &log).await;
        assert_eq!(outcome.finish().await.unwrap(), None);

        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_hooks_commit_over_source_reference() {
        let engine = Arc::new(MemoryEngine::new().with_output("echo a", "a\nb\n"));
        let buffer = SharedBuffer::default();
        let log = OutputSink::new(buffer.clone());

        let outcome = executor(&engine)
            .run("registry:5000/myapp:v2", Some(&manifest(&["echo a", "echo b"])), &log)
            .await;
        let image = outcome.finish().await.unwrap();
        assert!(image.unwrap().starts_with("sha256:"));

        assert_eq!(engine.commands(), vec!["echo a && echo b".to_string()]);
        assert_eq!(
            engine.commits(),
            vec![CommitSpec {
                container: "container-1".to_string(),
                repository: "registry:5000/myapp".to_string(),
                tag: "v2".to_string(),
            }]
        );
        assert_eq!(engine.removed(), vec!["container-1".to_string()]);

        let output = buffer.to_string_lossy();
        assert!(output.contains("---- Running build hooks ----\n"));
        assert!(output.contains(" ---> Running \"echo a && echo b\"\n"));
        assert!(output.contains("a\nb\n"));
    }

    #[tokio::test]
    async fn test_failed_hooks_skip_commit() {
        let engine = Arc::new(MemoryEngine::new().fail_on(Operation::Start));
        let outcome = executor(&engine)
            .run("myapp", Some(&manifest(&["make"])), &OutputSink::discard())
            .await;
        assert!(outcome.finish().await.is_err());

        assert!(engine.commits().is_empty());
        assert!(engine
            .calls()
            .iter()
            .any(|call| matches!(call, EngineCall::Remove { id, force: true } if id == "container-1")));
    }
}
