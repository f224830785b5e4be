use std::{io::ErrorKind, time::Duration};

use async_trait::async_trait;

use crate::{CommandError, CommandOutput, CommandSpec, SshProxy};

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. A non-zero exit is not an error.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;
}

/// Spawns real processes, optionally through an ssh proxy, killing them
/// once the time limit passes.
pub struct ProcessRunner {
    ssh_proxy: SshProxy,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(ssh_proxy: SshProxy, timeout: Duration) -> Self {
        Self { ssh_proxy, timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let mut command = self.ssh_proxy.command(spec);
        command.kill_on_drop(true);
        tracing::debug!("Running `{spec}`");
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(CommandError::NotFound {
                    program: spec.program.clone(),
                })
            }
            Ok(Err(source)) => {
                return Err(CommandError::Io {
                    program: spec.program.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(CommandError::TimedOut {
                    program: spec.program.clone(),
                    timeout: self.timeout,
                })
            }
        };
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn runner(timeout: Duration) -> ProcessRunner {
        ProcessRunner::new(SshProxy::default(), timeout)
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let out = runner(Duration::from_secs(5))
            .run(&CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let err = runner(Duration::from_secs(5))
            .run(&CommandSpec::new("definitely-not-a-real-binary-4711"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotFound { .. }));
    }

    #[tokio::test]
    async fn slow_program_times_out() {
        let err = runner(Duration::from_millis(100))
            .run(&CommandSpec::new("sleep").arg("5"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
    }
}
