use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::CommandSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshProxyConfig {
    pub host: String,
    pub username: String,
    #[serde(default = "SshProxyConfig::default_port")]
    pub port: u16,
}

impl SshProxyConfig {
    fn default_port() -> u16 {
        22
    }
}

/// An ssh proxy for command. It's transparent if not using ssh.
#[derive(Debug, Default)]
pub struct SshProxy {
    ssh: Option<SshTarget>,
}

#[derive(Debug)]
struct SshTarget {
    port: String,
    username_host: String,
}

impl SshProxy {
    pub fn new(ssh_config: &Option<SshProxyConfig>) -> Self {
        let Some(SshProxyConfig {
            host,
            username,
            port,
        }) = ssh_config
        else {
            return Self { ssh: None };
        };

        Self {
            ssh: Some(SshTarget {
                port: port.to_string(),
                username_host: format!("{username}@{host}"),
            }),
        }
    }

    /// Return the command over ssh if using ssh, or the command itself.
    /// Over ssh the working directory is entered on the remote side.
    pub fn command(&self, spec: &CommandSpec) -> Command {
        let Some(ssh) = &self.ssh else {
            let mut command = Command::new(&spec.program);
            command.args(&spec.args);
            if let Some(dir) = &spec.current_dir {
                command.current_dir(dir);
            }
            return command;
        };

        let mut command = Command::new("ssh");
        command.args(["-p", &ssh.port, &ssh.username_host]);
        if let Some(dir) = &spec.current_dir {
            command.arg("cd").arg(dir).arg("&&");
        }
        command.arg(&spec.program).args(&spec.args);
        command
    }

    #[inline]
    pub fn is_proxy(&self) -> bool {
        self.ssh.is_some()
    }
}
