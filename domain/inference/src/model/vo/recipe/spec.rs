use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};

use crate::model::vo::FieldErrors;

/// Container engine used to run a workload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ContainerRuntime {
    #[default]
    Apptainer,
    Singularity,
}

impl ContainerRuntime {
    pub fn binary(self) -> &'static str {
        match self {
            Self::Apptainer => "apptainer",
            Self::Singularity => "singularity",
        }
    }
}

impl FromStr for ContainerRuntime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "apptainer" => Ok(Self::Apptainer),
            "singularity" => Ok(Self::Singularity),
            other => Err(format!(
                "unsupported container runtime `{other}`, expected apptainer or singularity"
            )),
        }
    }
}

impl TryFrom<String> for ContainerRuntime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContainerRuntime> for String {
    fn from(value: ContainerRuntime) -> Self {
        value.binary().to_owned()
    }
}

impl fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub runtime: ContainerRuntime,
    #[serde(default)]
    pub binds: Vec<String>,
}

impl ContainerSpec {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if self.image.trim().is_empty() {
            errors.push("image", "is required");
        }
        for bind in &self.binds {
            if bind.trim().is_empty() {
                errors.push("binds", "bind paths must not be empty");
            }
        }
        errors
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub port: u32,
    #[serde(default = "PortSpec::default_protocol")]
    pub protocol: String,
}

impl PortSpec {
    fn default_protocol() -> String {
        "http".to_owned()
    }

    pub fn new(name: &str, port: u16) -> Self {
        Self {
            name: name.to_owned(),
            port: port.into(),
            protocol: Self::default_protocol(),
        }
    }

    /// URL scheme for endpoints built from this port.
    pub fn scheme(&self) -> &str {
        match self.protocol.as_str() {
            "" | "tcp" | "grpc" => "http",
            other => other,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    #[serde(default)]
    pub ports: Vec<PortSpec>,
}

impl NetworkSpec {
    pub const DEFAULT_PORT: u32 = 8000;

    /// First declared port; the service's `api` endpoint.
    pub fn primary_port(&self) -> Option<&PortSpec> {
        self.ports.first()
    }

    pub fn port(&self, name: &str) -> Option<&PortSpec> {
        self.ports.iter().find(|p| p.name == name)
    }

    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        let mut seen = Vec::with_capacity(self.ports.len());
        for (i, port) in self.ports.iter().enumerate() {
            let field = format!("ports[{i}]");
            if port.name.trim().is_empty() {
                errors.push(&field, "name is required");
            }
            if !(1..=65535).contains(&port.port) {
                errors.push(&field, format_args!("port must be in 1..=65535, got {}", port.port));
            }
            if seen.contains(&port.name.as_str()) {
                errors.push(&field, format_args!("duplicate port name `{}`", port.name));
            }
            seen.push(port.name.as_str());
        }
        errors
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    #[serde(default = "HealthCheckSpec::default_enabled")]
    pub enabled: bool,
    #[serde(default = "HealthCheckSpec::default_endpoint")]
    pub endpoint: String,
    #[serde(default = "HealthCheckSpec::default_port")]
    pub port: u32,
    /// Seconds between probes.
    #[serde(default = "HealthCheckSpec::default_interval")]
    pub interval: u64,
    /// Seconds before a probe is abandoned.
    #[serde(default = "HealthCheckSpec::default_timeout")]
    pub timeout: u64,
    #[serde(default = "HealthCheckSpec::default_retries")]
    pub retries: u32,
    #[serde(default = "HealthCheckSpec::default_initial_delay")]
    pub initial_delay: u64,
}

impl HealthCheckSpec {
    fn default_enabled() -> bool {
        true
    }
    fn default_endpoint() -> String {
        "/health".to_owned()
    }
    fn default_port() -> u32 {
        NetworkSpec::DEFAULT_PORT
    }
    fn default_interval() -> u64 {
        30
    }
    fn default_timeout() -> u64 {
        10
    }
    fn default_retries() -> u32 {
        3
    }
    fn default_initial_delay() -> u64 {
        30
    }

    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if !(1..=65535).contains(&self.port) {
            errors.push("port", format_args!("must be in 1..=65535, got {}", self.port));
        }
        if self.interval < 5 {
            errors.push("interval", format_args!("must be >= 5, got {}", self.interval));
        }
        if self.timeout < 1 {
            errors.push("timeout", "must be >= 1");
        }
        if self.retries < 1 {
            errors.push("retries", "must be >= 1");
        }
        errors
    }
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            endpoint: Self::default_endpoint(),
            port: Self::default_port(),
            interval: Self::default_interval(),
            timeout: Self::default_timeout(),
            retries: Self::default_retries(),
            initial_delay: Self::default_initial_delay(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSpec {
    #[serde(default = "MetricsSpec::default_enabled")]
    pub enabled: bool,
    #[serde(default = "MetricsSpec::default_endpoint")]
    pub endpoint: String,
    #[serde(default = "MetricsSpec::default_port")]
    pub port: u32,
    #[serde(default = "MetricsSpec::default_type", rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub exporter: Option<String>,
}

impl MetricsSpec {
    fn default_enabled() -> bool {
        true
    }
    fn default_endpoint() -> String {
        "/metrics".to_owned()
    }
    fn default_port() -> u32 {
        NetworkSpec::DEFAULT_PORT
    }
    fn default_type() -> String {
        "prometheus".to_owned()
    }

    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if !(1..=65535).contains(&self.port) {
            errors.push("port", format_args!("must be in 1..=65535, got {}", self.port));
        }
        errors
    }
}

impl Default for MetricsSpec {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            endpoint: Self::default_endpoint(),
            port: Self::default_port(),
            kind: Self::default_type(),
            exporter: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::String(s) => f.write_str(s),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
        }
    }
}

/// Accepts `KEY: 8000` as well as `KEY: "8000"` for string maps.
pub(crate) fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Scalar>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect())
}
