//! Running external commands, locally or through an ssh proxy, with a time limit.

mod runner;
mod ssh_proxy;

#[cfg(feature = "mock")]
pub mod mock;

use std::{fmt, path::PathBuf, time::Duration};

use thiserror::Error;

#[rustfmt::skip]
pub use {
    runner::{CommandRunner, ProcessRunner},
    ssh_proxy::{SshProxy, SshProxyConfig},
};

/// A program invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_owned(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("command `{program}` not found")]
    NotFound { program: String },

    #[error("command `{program}` timed out after {}s", timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("failed to run `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_renders_like_a_shell_line() {
        let spec = CommandSpec::new("squeue")
            .args(["--job", "42"])
            .arg("--noheader")
            .current_dir("/tmp");
        assert_eq!(spec.to_string(), "squeue --job 42 --noheader");
        assert_eq!(spec.current_dir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn only_zero_exit_is_success() {
        let ok = CommandOutput {
            code: Some(0),
            ..Default::default()
        };
        assert!(ok.success());
        assert!(!CommandOutput::default().success());
    }
}
