use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::{InstanceStatus, RecipePatch, ResourceSpec};

/// Everything needed to render one batch script.
#[derive(Clone, Debug, TypedBuilder)]
pub struct ScriptInfo {
    #[builder(setter(into))]
    pub job_name: String,
    #[builder(setter(into))]
    pub command: String,
    pub resources: ResourceSpec,
    #[builder(default)]
    pub environment: BTreeMap<String, String>,
    /// Directory receiving `<job_name>_<job id>.out/.err`.
    #[builder(setter(into))]
    pub output_dir: PathBuf,
    /// Shell lines run before the payload command.
    #[builder(default)]
    pub setup_commands: Vec<String>,
}

/// Which output file of a job to read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    #[default]
    Output,
    Error,
}

impl LogStream {
    pub fn extension(self) -> &'static str {
        match self {
            LogStream::Output => "out",
            LogStream::Error => "err",
        }
    }
}

impl FromStr for LogStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "output" | "out" | "stdout" => Ok(Self::Output),
            "error" | "err" | "stderr" => Ok(Self::Error),
            other => Err(format!("unknown log stream `{other}`")),
        }
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogStream::Output => "output",
            LogStream::Error => "error",
        })
    }
}

/// Arguments of a lifecycle `start`.
#[derive(Clone, Debug, TypedBuilder)]
pub struct StartRequest {
    #[builder(setter(into))]
    pub recipe_name: String,
    #[builder(default, setter(strip_option))]
    pub overrides: Option<RecipePatch>,
    /// Block until ready (servers, monitors) or finished (clients).
    #[builder(default)]
    pub wait: bool,
    /// Overrides the configured wait timeout.
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
    /// Client runs: service id or literal URL to target.
    #[builder(default, setter(strip_option, into))]
    pub target: Option<String>,
    /// Monitors: service ids to scrape, in addition to the recipe's.
    #[builder(default)]
    pub targets: Vec<String>,
}

/// Outcome of probing a running service's health endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthReport {
    pub fn unhealthy(status: InstanceStatus, message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            status,
            status_code: None,
            endpoint: None,
            message: Some(message.into()),
        }
    }
}
