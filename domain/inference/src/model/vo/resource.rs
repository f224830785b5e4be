use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::FieldErrors;

static MEMORY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(K|M|G|KB|MB|GB)$").expect("valid memory pattern"));
static TIME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d+-)?\d+:[0-5]\d:[0-5]\d$|^\d{1,2}:[0-5]\d$").expect("valid time pattern")
});

/// Memory request such as `16G` or `512MB`, unit always upper case.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Memory(String);

impl Memory {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Memory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        if MEMORY_PATTERN.is_match(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(format!(
                "invalid memory format `{s}`, expected a number followed by K, M, G, KB, MB or GB"
            ))
        }
    }
}

impl TryFrom<String> for Memory {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Memory> for String {
    fn from(value: Memory) -> Self {
        value.0
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wall time limit, `HH:MM:SS`, `MM:SS` or `D-HH:MM:SS`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WallTime(String);

impl WallTime {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for WallTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if TIME_PATTERN.is_match(trimmed) {
            Ok(Self(trimmed.to_owned()))
        } else {
            Err(format!("invalid time format `{s}`, expected HH:MM:SS or MM:SS"))
        }
    }
}

impl TryFrom<String> for WallTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WallTime> for String {
    fn from(value: WallTime) -> Self {
        value.0
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated compute request of a job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ResourceSpecDocument", into = "ResourceSpecDocument")]
pub struct ResourceSpec {
    nodes: u32,
    gpus: u32,
    gpu_type: Option<String>,
    cpus_per_task: u32,
    memory: Memory,
    time: WallTime,
    partition: String,
}

impl ResourceSpec {
    pub fn nodes(&self) -> u32 {
        self.nodes
    }

    pub fn gpus(&self) -> u32 {
        self.gpus
    }

    pub fn gpu_type(&self) -> Option<&str> {
        self.gpu_type.as_deref()
    }

    pub fn cpus_per_task(&self) -> u32 {
        self.cpus_per_task
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn time(&self) -> &WallTime {
        &self.time
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Generic resource request for GPUs, `None` when no GPU is requested.
    pub fn gres(&self) -> Option<String> {
        if self.gpus == 0 {
            return None;
        }
        Some(match &self.gpu_type {
            Some(gpu_type) => format!("gpu:{gpu_type}:{}", self.gpus),
            None => format!("gpu:{}", self.gpus),
        })
    }

    pub fn to_document(&self) -> ResourceSpecDocument {
        self.clone().into()
    }
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            nodes: 1,
            gpus: 0,
            gpu_type: None,
            cpus_per_task: 4,
            memory: Memory("16G".to_owned()),
            time: WallTime("01:00:00".to_owned()),
            partition: ResourceSpecDocument::default_partition(),
        }
    }
}

/// Unvalidated shape of a `resources` section as written in a recipe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpecDocument {
    #[serde(default = "ResourceSpecDocument::default_nodes")]
    pub nodes: i64,
    #[serde(default)]
    pub gpus: i64,
    #[serde(default)]
    pub gpu_type: Option<String>,
    #[serde(default = "ResourceSpecDocument::default_cpus_per_task", alias = "cpusPerTask")]
    pub cpus_per_task: i64,
    #[serde(default = "ResourceSpecDocument::default_memory")]
    pub memory: String,
    #[serde(
        default = "ResourceSpecDocument::default_time",
        alias = "wall_time",
        alias = "wallTime"
    )]
    pub time: String,
    #[serde(default = "ResourceSpecDocument::default_partition")]
    pub partition: String,
}

impl ResourceSpecDocument {
    fn default_nodes() -> i64 {
        1
    }
    fn default_cpus_per_task() -> i64 {
        4
    }
    fn default_memory() -> String {
        "16G".to_owned()
    }
    fn default_time() -> String {
        "01:00:00".to_owned()
    }
    fn default_partition() -> String {
        "gpu".to_owned()
    }
}

impl Default for ResourceSpecDocument {
    fn default() -> Self {
        ResourceSpec::default().into()
    }
}

fn positive(errors: &mut FieldErrors, field: &str, value: i64, min: i64) -> u32 {
    match u32::try_from(value) {
        Ok(v) if value >= min => v,
        _ => {
            errors.push(field, format_args!("must be >= {min}, got {value}"));
            0
        }
    }
}

impl TryFrom<ResourceSpecDocument> for ResourceSpec {
    type Error = FieldErrors;

    fn try_from(doc: ResourceSpecDocument) -> Result<Self, Self::Error> {
        let mut errors = FieldErrors::new();
        let nodes = positive(&mut errors, "nodes", doc.nodes, 1);
        let gpus = positive(&mut errors, "gpus", doc.gpus, 0);
        let cpus_per_task = positive(&mut errors, "cpus_per_task", doc.cpus_per_task, 1);
        let memory = doc.memory.parse::<Memory>().map_err(|e| errors.push("memory", e)).ok();
        let time = doc.time.parse::<WallTime>().map_err(|e| errors.push("time", e)).ok();
        let partition = doc.partition.trim().to_owned();
        if partition.is_empty() {
            errors.push("partition", "must not be empty");
        }
        let gpu_type = doc.gpu_type.filter(|t| !t.trim().is_empty());
        match (memory, time) {
            (Some(memory), Some(time)) if errors.is_empty() => Ok(Self {
                nodes,
                gpus,
                gpu_type,
                cpus_per_task,
                memory,
                time,
                partition,
            }),
            _ => Err(errors),
        }
    }
}

impl From<ResourceSpec> for ResourceSpecDocument {
    fn from(spec: ResourceSpec) -> Self {
        Self {
            nodes: spec.nodes.into(),
            gpus: spec.gpus.into(),
            gpu_type: spec.gpu_type,
            cpus_per_task: spec.cpus_per_task.into(),
            memory: spec.memory.into(),
            time: spec.time.into(),
            partition: spec.partition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_accepts_known_units_and_normalizes() {
        for (input, expected) in [
            ("16G", "16G"),
            ("32GB", "32GB"),
            ("1024M", "1024M"),
            ("512MB", "512MB"),
            ("1024K", "1024K"),
            ("32gb", "32GB"),
            (" 8g ", "8G"),
        ] {
            assert_eq!(input.parse::<Memory>().unwrap().as_str(), expected);
        }
    }

    #[test]
    fn memory_rejects_missing_or_unknown_unit() {
        for input in ["16", "16X", "G", "", "1.5G", "16 G"] {
            assert!(input.parse::<Memory>().is_err(), "{input} should be rejected");
        }
    }

    #[test]
    fn time_formats() {
        for input in ["01:00:00", "00:30:00", "10:00", "48:00:00", "1-12:00:00"] {
            assert!(input.parse::<WallTime>().is_ok(), "{input} should be accepted");
        }
        for input in ["garbage", "10", "00:60:00", "1:2:3", ""] {
            assert!(input.parse::<WallTime>().is_err(), "{input} should be rejected");
        }
    }

    #[test]
    fn defaults_match_document_defaults() {
        let from_doc = ResourceSpec::try_from(ResourceSpecDocument::default()).unwrap();
        assert_eq!(from_doc, ResourceSpec::default());
        assert_eq!(from_doc.cpus_per_task(), 4);
        assert_eq!(from_doc.partition(), "gpu");
        assert_eq!(from_doc.gres(), None);
    }

    #[test]
    fn collects_every_invalid_field() {
        let doc = ResourceSpecDocument {
            nodes: 0,
            gpus: -1,
            memory: "16X".to_owned(),
            time: "garbage".to_owned(),
            ..Default::default()
        };
        let errors = ResourceSpec::try_from(doc).unwrap_err().into_inner();
        assert_eq!(errors.len(), 4);
        assert!(errors[0].starts_with("nodes:"));
        assert!(errors.iter().any(|e| e.starts_with("memory:")));
        assert!(errors.iter().any(|e| e.starts_with("time:")));
    }

    #[test]
    fn deserialization_validates() {
        let spec: ResourceSpec = serde_json::from_value(serde_json::json!({
            "nodes": 1,
            "gpus": 2,
            "gpu_type": "a100",
            "memory": "32g",
        }))
        .unwrap();
        assert_eq!(spec.memory().as_str(), "32G");
        assert_eq!(spec.gres().as_deref(), Some("gpu:a100:2"));
        assert_eq!(spec.time().as_str(), "01:00:00");

        let bad = serde_json::from_value::<ResourceSpec>(serde_json::json!({ "memory": "16" }));
        assert!(bad.is_err());
    }
}
