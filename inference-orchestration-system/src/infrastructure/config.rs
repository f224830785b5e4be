use std::{path::PathBuf, time::Duration};

use infrastructure_command::SshProxyConfig;
use serde::*;
use service_inference::LifecycleSettings;

use super::telemetry::TelemetryConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "Default::default")]
    pub orchestrator: OrchestratorConfig,
    #[serde(default = "Default::default")]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "OrchestratorConfig::default_recipes_dir")]
    pub recipes_dir: String,
    /// Registry files, batch scripts and job output.
    #[serde(default = "OrchestratorConfig::default_logs_dir")]
    pub logs_dir: String,
    #[serde(default = "OrchestratorConfig::default_results_dir")]
    pub results_dir: String,
    #[serde(default = "OrchestratorConfig::default_endpoint_dir")]
    pub endpoint_dir: String,
    #[serde(default = "Default::default")]
    pub slurm: SlurmConfig,
    #[serde(default = "Default::default")]
    pub container: ContainerConfig,
    #[serde(default = "Default::default")]
    pub polling: PollingConfig,
    #[serde(default = "Default::default")]
    pub registry: RegistryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            recipes_dir: Self::default_recipes_dir(),
            logs_dir: Self::default_logs_dir(),
            results_dir: Self::default_results_dir(),
            endpoint_dir: Self::default_endpoint_dir(),
            slurm: Default::default(),
            container: Default::default(),
            polling: Default::default(),
            registry: Default::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn default_recipes_dir() -> String {
        "recipes".to_string()
    }
    pub fn default_logs_dir() -> String {
        "logs".to_string()
    }
    pub fn default_results_dir() -> String {
        "results".to_string()
    }
    pub fn default_endpoint_dir() -> String {
        "endpoints".to_string()
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            logs_dir: absolute(&self.logs_dir),
            results_dir: absolute(&self.results_dir),
            endpoint_dir: absolute(&self.endpoint_dir),
            poll_interval: Duration::from_secs(self.polling.interval_secs.max(1)),
            ready_timeout: Duration::from_secs(self.polling.ready_timeout_secs),
            completion_timeout: Duration::from_secs(self.polling.completion_timeout_secs),
        }
    }
}

/// Batch jobs run inside their own work directory, so every path handed to
/// them is made absolute.
fn absolute(dir: &str) -> PathBuf {
    let path = PathBuf::from(dir);
    if path.is_absolute() {
        return path;
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(&path))
        .unwrap_or(path)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlurmConfig {
    /// Upper bound for every `sbatch`/`squeue`/`sacct`/`scancel` call.
    #[serde(default = "SlurmConfig::default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "Default::default")]
    pub account: Option<String>,
    #[serde(default = "Default::default")]
    pub qos: Option<String>,
    /// Emitted as `module load <name>` lines before the payload.
    #[serde(default = "Default::default")]
    pub modules: Vec<String>,
    #[serde(default = "Default::default")]
    pub ssh_proxy: Option<SshProxyConfig>,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: Self::default_command_timeout_secs(),
            account: None,
            qos: None,
            modules: Vec::new(),
            ssh_proxy: None,
        }
    }
}

impl SlurmConfig {
    pub fn default_command_timeout_secs() -> u64 {
        30
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Bound into every container besides `/tmp` and `/dev/shm`.
    #[serde(default = "Default::default")]
    pub binds: Vec<String>,
    /// Fail a start when the image file does not exist locally.
    #[serde(default = "Default::default")]
    pub validate_image: bool,
    /// Used by client runs whose target could not be resolved.
    #[serde(default = "ContainerConfig::default_target_endpoint")]
    pub default_target_endpoint: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            binds: Vec::new(),
            validate_image: false,
            default_target_endpoint: Self::default_target_endpoint(),
        }
    }
}

impl ContainerConfig {
    pub fn default_target_endpoint() -> String {
        "http://localhost:8000".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "PollingConfig::default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "PollingConfig::default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "PollingConfig::default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval_secs(),
            ready_timeout_secs: Self::default_ready_timeout_secs(),
            completion_timeout_secs: Self::default_completion_timeout_secs(),
        }
    }
}

impl PollingConfig {
    pub fn default_interval_secs() -> u64 {
        5
    }
    pub fn default_ready_timeout_secs() -> u64 {
        300
    }
    pub fn default_completion_timeout_secs() -> u64 {
        3600
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Terminal records older than this are removed by `cleanup`.
    #[serde(default = "RegistryConfig::default_stale_after_hours")]
    pub stale_after_hours: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_after_hours: Self::default_stale_after_hours(),
        }
    }
}

impl RegistryConfig {
    pub fn default_stale_after_hours() -> u64 {
        24
    }
}

/// `config.yaml` in the working directory, then every file given with
/// `--config`, then `INFERBENCH__SECTION__KEY` environment variables.
pub fn build_config(files: &[PathBuf]) -> anyhow::Result<config::Config> {
    let mut config = config::Config::builder().add_source(
        config::File::with_name("config")
            .required(false)
            .format(config::FileFormat::Yaml),
    );
    for file in files {
        config = config.add_source(
            config::File::from(file.as_path())
                .format(config::FileFormat::Yaml)
                .required(true),
        );
    }
    config = config.add_source(
        config::Environment::with_prefix("INFERBENCH")
            .separator("__")
            .try_parsing(true)
            .list_separator(";")
            .with_list_parse_key("orchestrator.slurm.modules")
            .with_list_parse_key("orchestrator.container.binds"),
    );
    Ok(config.build()?)
}
