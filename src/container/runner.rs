//! Single-command execution in ephemeral containers.
//!
//! Runs one shell command in a fresh container and streams its output to
//! the caller's sinks. The protocol is strictly ordered:
//!
//! 1. create the container with `/bin/sh -c <command>`
//! 2. attach to stdout/stderr
//! 3. wait until the attach stream is live
//! 4. start the container
//! 5. wait until the output has been drained
//!
//! Starting before the attach is live would lose early output. A failure at
//! any step stops the sequence; the container, if created, is still handed
//! back so the caller can remove it. The container is guarded from the
//! moment it exists, so a cancelled run still removes it.

use crate::container::{ContainerClient, ContainerGuard, CreateSpec, OutputSink, Result};
use tracing::debug;

/// Outcome of [`CommandRunner::run`].
///
/// `container` is populated whenever creation succeeded, even if `result`
/// is an error.
#[derive(Debug)]
pub struct CommandRun {
    pub container: ContainerGuard,
    pub result: Result<()>,
}

impl CommandRun {
    pub fn into_parts(self) -> (ContainerGuard, Result<()>) {
        (self.container, self.result)
    }
}

/// Runs shell commands inside short-lived containers.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    client: ContainerClient,
}

impl CommandRunner {
    pub fn new(client: ContainerClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ContainerClient {
        &self.client
    }

    /// Run `command` in a new container created from `image`.
    ///
    /// `log` receives engine progress such as image pulls. Without a
    /// `stderr` sink the command's stderr is discarded. No retry is made.
    pub async fn run(
        &self,
        image: &str,
        command: &str,
        log: &OutputSink,
        stdout: OutputSink,
        stderr: Option<OutputSink>,
    ) -> CommandRun {
        self.run_with_upload(&CreateSpec::shell(image, command), None, log, stdout, stderr)
            .await
    }

    /// Like [`CommandRunner::run`] with a caller-built create spec, plus an
    /// optional tar archive extracted into the container before it starts.
    pub(crate) async fn run_with_upload(
        &self,
        spec: &CreateSpec,
        upload: Option<(&str, Vec<u8>)>,
        log: &OutputSink,
        stdout: OutputSink,
        stderr: Option<OutputSink>,
    ) -> CommandRun {
        let id = match self.client.create_container(spec, log).await {
            Ok(id) => id,
            Err(e) => {
                return CommandRun {
                    container: ContainerGuard::empty(self.client.clone()),
                    result: Err(e),
                };
            }
        };
        debug!("Created container {} from {}", id, spec.image);
        let container = ContainerGuard::new(self.client.clone(), id.as_str());

        let result = self
            .execute(&id, upload, stdout, stderr.unwrap_or_else(OutputSink::discard))
            .await;
        CommandRun { container, result }
    }

    async fn execute(
        &self,
        id: &str,
        upload: Option<(&str, Vec<u8>)>,
        stdout: OutputSink,
        stderr: OutputSink,
    ) -> Result<()> {
        if let Some((path, tar)) = upload {
            self.client.upload_to_container(id, path, tar).await?;
        }

        let mut attachment = self.client.attach_container(id, stdout, stderr).await?;
        attachment.ready().await?;

        self.client.start_container(id).await?;
        debug!("Started container {}", id);

        attachment.wait().await?;
        debug!("Container {} finished", id);
        Ok(())
    }
}
