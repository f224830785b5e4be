//! Typed recipe overrides.
//!
//! Merge rules, applied field by field:
//!
//! | field shape                                                       | rule                  |
//! |-------------------------------------------------------------------|-----------------------|
//! | scalars, lists (`command`, `post_start`, `targets`, `network`...) | replace when present  |
//! | maps (`labels`, `environment`, `workload`, `output`, ...)         | merge key by key      |
//! | nested specs (`container`, `resources`, `target`, ...)            | merge field by field  |
//!
//! The patched recipe is validated again; an empty patch returns the recipe unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    ClientRecipe, ClientRecipeDocument, ContainerRuntime, ContainerSpec, FieldErrors,
    HealthCheckSpec, MetricsSpec, MonitorRecipe, MonitorRecipeDocument, NetworkSpec, Recipe,
    RecipeKind, RecipeMetadata, ResourceSpecDocument, ServerRecipe, ServerRecipeDocument,
    TargetSpec,
};

fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
    if let Some(v) = value {
        *slot = v.clone();
    }
}

fn merge<V: Clone>(into: &mut BTreeMap<String, V>, from: &BTreeMap<String, V>) {
    into.extend(from.iter().map(|(k, v)| (k.clone(), v.clone())));
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourcePatch {
    pub nodes: Option<i64>,
    pub gpus: Option<i64>,
    pub gpu_type: Option<String>,
    #[serde(alias = "cpusPerTask")]
    pub cpus_per_task: Option<i64>,
    pub memory: Option<String>,
    #[serde(alias = "wall_time", alias = "wallTime")]
    pub time: Option<String>,
    pub partition: Option<String>,
}

impl ResourcePatch {
    pub fn apply(&self, doc: &mut ResourceSpecDocument) {
        set(&mut doc.nodes, &self.nodes);
        set(&mut doc.gpus, &self.gpus);
        if self.gpu_type.is_some() {
            doc.gpu_type = self.gpu_type.clone();
        }
        set(&mut doc.cpus_per_task, &self.cpus_per_task);
        set(&mut doc.memory, &self.memory);
        set(&mut doc.time, &self.time);
        set(&mut doc.partition, &self.partition);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerPatch {
    pub image: Option<String>,
    pub runtime: Option<ContainerRuntime>,
    pub binds: Option<Vec<String>>,
}

impl ContainerPatch {
    pub fn apply(&self, spec: &mut ContainerSpec) {
        set(&mut spec.image, &self.image);
        set(&mut spec.runtime, &self.runtime);
        set(&mut spec.binds, &self.binds);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthCheckPatch {
    pub enabled: Option<bool>,
    pub endpoint: Option<String>,
    pub port: Option<u32>,
    pub interval: Option<u64>,
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub initial_delay: Option<u64>,
}

impl HealthCheckPatch {
    pub fn apply(&self, spec: &mut HealthCheckSpec) {
        set(&mut spec.enabled, &self.enabled);
        set(&mut spec.endpoint, &self.endpoint);
        set(&mut spec.port, &self.port);
        set(&mut spec.interval, &self.interval);
        set(&mut spec.timeout, &self.timeout);
        set(&mut spec.retries, &self.retries);
        set(&mut spec.initial_delay, &self.initial_delay);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsPatch {
    pub enabled: Option<bool>,
    pub endpoint: Option<String>,
    pub port: Option<u32>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub exporter: Option<String>,
}

impl MetricsPatch {
    pub fn apply(&self, spec: &mut MetricsSpec) {
        set(&mut spec.enabled, &self.enabled);
        set(&mut spec.endpoint, &self.endpoint);
        set(&mut spec.port, &self.port);
        set(&mut spec.kind, &self.kind);
        if self.exporter.is_some() {
            spec.exporter = self.exporter.clone();
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetPatch {
    pub url: Option<String>,
    pub endpoint_file: Option<String>,
    pub service: Option<String>,
    pub endpoint_name: Option<String>,
}

impl TargetPatch {
    pub fn apply(&self, spec: &mut TargetSpec) {
        if self.url.is_some() {
            spec.url = self.url.clone();
        }
        if self.endpoint_file.is_some() {
            spec.endpoint_file = self.endpoint_file.clone();
        }
        if self.service.is_some() {
            spec.service = self.service.clone();
        }
        set(&mut spec.endpoint_name, &self.endpoint_name);
    }
}

/// Overrides of the fields every recipe kind shares. The name is never patched.
struct MetadataPatch {
    description: Option<String>,
    version: Option<String>,
    labels: BTreeMap<String, String>,
}

impl MetadataPatch {
    fn apply(&self, metadata: &mut RecipeMetadata) {
        if self.description.is_some() {
            metadata.description = self.description.clone();
        }
        set(&mut metadata.version, &self.version);
        merge(&mut metadata.labels, &self.labels);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerPatch {
    pub description: Option<String>,
    pub version: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub container: Option<ContainerPatch>,
    pub resources: Option<ResourcePatch>,
    pub network: Option<NetworkSpec>,
    pub environment: BTreeMap<String, String>,
    pub command: Option<String>,
    pub post_start: Option<Vec<String>>,
    pub healthcheck: Option<HealthCheckPatch>,
    pub metrics: Option<MetricsPatch>,
}

impl ServerPatch {
    pub fn apply(&self, recipe: &ServerRecipe) -> Result<ServerRecipe, FieldErrors> {
        let mut doc = ServerRecipeDocument::from(recipe.clone());
        MetadataPatch {
            description: self.description.clone(),
            version: self.version.clone(),
            labels: self.labels.clone(),
        }
        .apply(&mut doc.metadata);
        if let Some(patch) = &self.container {
            patch.apply(doc.container.get_or_insert_with(Default::default));
        }
        if let Some(patch) = &self.resources {
            patch.apply(&mut doc.resources);
        }
        set(&mut doc.network, &self.network);
        merge(&mut doc.environment, &self.environment);
        if self.command.is_some() {
            doc.command = self.command.clone();
        }
        set(&mut doc.post_start, &self.post_start);
        if let Some(patch) = &self.healthcheck {
            patch.apply(&mut doc.healthcheck);
        }
        if let Some(patch) = &self.metrics {
            patch.apply(&mut doc.metrics);
        }
        ServerRecipe::from_document(doc)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientPatch {
    pub description: Option<String>,
    pub version: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub container: Option<ContainerPatch>,
    pub resources: Option<ResourcePatch>,
    pub target: Option<TargetPatch>,
    pub workload: BTreeMap<String, Value>,
    pub environment: BTreeMap<String, String>,
    pub command: Option<String>,
    pub output: BTreeMap<String, Value>,
}

impl ClientPatch {
    pub fn apply(&self, recipe: &ClientRecipe) -> Result<ClientRecipe, FieldErrors> {
        let mut doc = ClientRecipeDocument::from(recipe.clone());
        MetadataPatch {
            description: self.description.clone(),
            version: self.version.clone(),
            labels: self.labels.clone(),
        }
        .apply(&mut doc.metadata);
        if let Some(patch) = &self.container {
            patch.apply(doc.container.get_or_insert_with(Default::default));
        }
        if let Some(patch) = &self.resources {
            patch.apply(&mut doc.resources);
        }
        if let Some(patch) = &self.target {
            patch.apply(&mut doc.target);
        }
        merge(&mut doc.workload, &self.workload);
        merge(&mut doc.environment, &self.environment);
        if self.command.is_some() {
            doc.command = self.command.clone();
        }
        merge(&mut doc.output, &self.output);
        ClientRecipe::from_document(doc)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorPatch {
    pub description: Option<String>,
    pub version: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub container: Option<ContainerPatch>,
    pub resources: Option<ResourcePatch>,
    pub network: Option<NetworkSpec>,
    pub environment: BTreeMap<String, String>,
    pub command: Option<String>,
    pub targets: Option<Vec<String>>,
    pub scrape_interval: Option<u64>,
    pub retention: Option<String>,
    pub prometheus: BTreeMap<String, Value>,
    pub grafana: BTreeMap<String, Value>,
}

impl MonitorPatch {
    pub fn apply(&self, recipe: &MonitorRecipe) -> Result<MonitorRecipe, FieldErrors> {
        let mut doc = MonitorRecipeDocument::from(recipe.clone());
        MetadataPatch {
            description: self.description.clone(),
            version: self.version.clone(),
            labels: self.labels.clone(),
        }
        .apply(&mut doc.metadata);
        if let Some(patch) = &self.container {
            patch.apply(doc.container.get_or_insert_with(Default::default));
        }
        if let Some(patch) = &self.resources {
            patch.apply(&mut doc.resources);
        }
        set(&mut doc.network, &self.network);
        merge(&mut doc.environment, &self.environment);
        if self.command.is_some() {
            doc.command = self.command.clone();
        }
        set(&mut doc.targets, &self.targets);
        set(&mut doc.scrape_interval, &self.scrape_interval);
        set(&mut doc.retention, &self.retention);
        merge(&mut doc.prometheus, &self.prometheus);
        merge(&mut doc.grafana, &self.grafana);
        MonitorRecipe::from_document(doc)
    }
}

/// Overrides for one recipe kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RecipePatch {
    Server(ServerPatch),
    Client(ClientPatch),
    Monitor(MonitorPatch),
}

impl RecipePatch {
    /// Parse untagged override values for a known recipe kind.
    pub fn from_value(kind: RecipeKind, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            RecipeKind::Server => RecipePatch::Server(serde_json::from_value(value)?),
            RecipeKind::Client => RecipePatch::Client(serde_json::from_value(value)?),
            RecipeKind::Monitor => RecipePatch::Monitor(serde_json::from_value(value)?),
        })
    }

    pub fn kind(&self) -> RecipeKind {
        match self {
            RecipePatch::Server(_) => RecipeKind::Server,
            RecipePatch::Client(_) => RecipeKind::Client,
            RecipePatch::Monitor(_) => RecipeKind::Monitor,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RecipePatch::Server(p) => *p == ServerPatch::default(),
            RecipePatch::Client(p) => *p == ClientPatch::default(),
            RecipePatch::Monitor(p) => *p == MonitorPatch::default(),
        }
    }

    pub fn apply(&self, recipe: &Recipe) -> Result<Recipe, FieldErrors> {
        if self.is_empty() && self.kind() == recipe.kind() {
            return Ok(recipe.clone());
        }
        match (self, recipe) {
            (RecipePatch::Server(p), Recipe::Server(r)) => p.apply(r).map(Recipe::Server),
            (RecipePatch::Client(p), Recipe::Client(r)) => p.apply(r).map(Recipe::Client),
            (RecipePatch::Monitor(p), Recipe::Monitor(r)) => p.apply(r).map(Recipe::Monitor),
            _ => {
                let mut errors = FieldErrors::new();
                errors.push(
                    "type",
                    format_args!(
                        "{} overrides cannot be applied to {} recipe `{}`",
                        self.kind(),
                        recipe.kind(),
                        recipe.name()
                    ),
                );
                Err(errors)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::vo::ResourceSpec;

    fn server() -> Recipe {
        let doc: ServerRecipeDocument = serde_json::from_value(json!({
            "name": "vllm",
            "labels": { "team": "hpc" },
            "container": { "image": "/images/vllm.sif", "binds": ["/data:/data"] },
            "resources": { "gpus": 1, "memory": "32G" },
            "network": { "ports": [{ "name": "api", "port": 8000 }] },
            "environment": { "MODEL": "llama", "TP": "1" },
            "post_start": ["echo ready"],
        }))
        .unwrap();
        Recipe::Server(ServerRecipe::from_document(doc).unwrap())
    }

    #[test]
    fn empty_patch_is_identity() {
        let recipe = server();
        let patched = RecipePatch::Server(ServerPatch::default()).apply(&recipe).unwrap();
        assert_eq!(patched, recipe);
    }

    #[test]
    fn merges_maps_and_nested_specs_field_by_field() {
        let patch = RecipePatch::from_value(
            RecipeKind::Server,
            json!({
                "labels": { "run": "7" },
                "environment": { "TP": "2" },
                "resources": { "gpus": 2 },
                "container": { "image": "/images/vllm-2.sif" },
                "post_start": [],
            }),
        )
        .unwrap();
        let Recipe::Server(patched) = patch.apply(&server()).unwrap() else {
            panic!("kind changed");
        };
        assert_eq!(patched.metadata.labels.len(), 2);
        assert_eq!(patched.environment["MODEL"], "llama");
        assert_eq!(patched.environment["TP"], "2");
        assert_eq!(patched.resources.gpus(), 2);
        assert_eq!(patched.resources.memory().as_str(), "32G");
        assert_eq!(patched.container.image, "/images/vllm-2.sif");
        assert_eq!(patched.container.binds, vec!["/data:/data".to_owned()]);
        assert!(patched.post_start.is_empty());
    }

    #[test]
    fn patched_recipe_is_revalidated() {
        let patch = RecipePatch::Server(ServerPatch {
            resources: Some(ResourcePatch {
                memory: Some("lots".to_owned()),
                ..Default::default()
            }),
            ..Default::default()
        });
        let errors = patch.apply(&server()).unwrap_err().into_inner();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("resources.memory"));
    }

    #[test]
    fn rejects_unknown_override_fields_and_wrong_kind() {
        assert!(RecipePatch::from_value(RecipeKind::Server, json!({ "gpu": 1 })).is_err());

        let patch = RecipePatch::Client(ClientPatch {
            command: Some("run".to_owned()),
            ..Default::default()
        });
        assert!(patch.apply(&server()).is_err());
    }

    #[test]
    fn untouched_resources_keep_their_values() {
        let recipe = server();
        let patch = RecipePatch::Server(ServerPatch {
            command: Some("vllm serve".to_owned()),
            ..Default::default()
        });
        let patched = patch.apply(&recipe).unwrap();
        assert_eq!(patched.resources(), recipe.resources());
        assert_ne!(patched.resources(), &ResourceSpec::default());
        assert_eq!(patched.command(), Some("vllm serve"));
    }
}
