use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{resolve_resources, spec::scalar_map, ContainerSpec, NetworkSpec, PortSpec, RecipeMetadata};
use crate::model::vo::{FieldErrors, ResourceSpec, ResourceSpecDocument};

/// A Prometheus/Grafana stack scraping running servers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MonitorRecipeDocument")]
pub struct MonitorRecipe {
    #[serde(flatten)]
    pub metadata: RecipeMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerSpec>,
    pub resources: ResourceSpec,
    pub network: NetworkSpec,
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Server instance ids scraped by default.
    pub targets: Vec<String>,
    /// Seconds.
    pub scrape_interval: u64,
    pub retention: String,
    pub prometheus: BTreeMap<String, Value>,
    pub grafana: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MonitorRecipeDocument {
    #[serde(flatten)]
    pub metadata: RecipeMetadata,
    #[serde(default)]
    pub container: Option<ContainerSpec>,
    #[serde(default)]
    pub resources: ResourceSpecDocument,
    #[serde(default = "MonitorRecipeDocument::default_network")]
    pub network: NetworkSpec,
    #[serde(default, deserialize_with = "scalar_map")]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default = "MonitorRecipeDocument::default_scrape_interval")]
    pub scrape_interval: u64,
    #[serde(default = "MonitorRecipeDocument::default_retention")]
    pub retention: String,
    #[serde(default)]
    pub prometheus: BTreeMap<String, Value>,
    #[serde(default)]
    pub grafana: BTreeMap<String, Value>,
}

impl MonitorRecipeDocument {
    fn default_network() -> NetworkSpec {
        NetworkSpec {
            ports: vec![PortSpec::new("prometheus", 9090), PortSpec::new("grafana", 3000)],
        }
    }
    fn default_scrape_interval() -> u64 {
        15
    }
    fn default_retention() -> String {
        "7d".to_owned()
    }
}

impl Default for MonitorRecipeDocument {
    fn default() -> Self {
        Self {
            metadata: RecipeMetadata::default(),
            container: None,
            resources: ResourceSpecDocument::default(),
            network: Self::default_network(),
            environment: BTreeMap::new(),
            command: None,
            targets: Vec::new(),
            scrape_interval: Self::default_scrape_interval(),
            retention: Self::default_retention(),
            prometheus: BTreeMap::new(),
            grafana: BTreeMap::new(),
        }
    }
}

impl MonitorRecipe {
    pub fn from_document(doc: MonitorRecipeDocument) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::new();
        let resources = resolve_resources(doc.resources, &mut errors);
        let recipe = Self {
            metadata: doc.metadata,
            container: doc.container,
            resources: resources.unwrap_or_default(),
            network: doc.network,
            environment: doc.environment,
            command: doc.command.filter(|c| !c.trim().is_empty()),
            targets: doc.targets,
            scrape_interval: doc.scrape_interval,
            retention: doc.retention,
            prometheus: doc.prometheus,
            grafana: doc.grafana,
        };
        recipe.collect_errors(&mut errors);
        errors.finish(recipe)
    }

    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        self.collect_errors(&mut errors);
        errors.finish(())
    }

    fn collect_errors(&self, errors: &mut FieldErrors) {
        self.metadata.validate(errors);
        if let Some(container) = &self.container {
            errors.extend_nested("container", container.validate());
        }
        errors.extend_nested("network", self.network.validate());
        if self.scrape_interval < 5 {
            errors.push(
                "scrape_interval",
                format_args!("must be >= 5, got {}", self.scrape_interval),
            );
        }
        if self.retention.trim().is_empty() {
            errors.push("retention", "must not be empty");
        }
    }
}

impl TryFrom<MonitorRecipeDocument> for MonitorRecipe {
    type Error = FieldErrors;

    fn try_from(doc: MonitorRecipeDocument) -> Result<Self, Self::Error> {
        Self::from_document(doc)
    }
}

impl From<MonitorRecipe> for MonitorRecipeDocument {
    fn from(recipe: MonitorRecipe) -> Self {
        Self {
            metadata: recipe.metadata,
            container: recipe.container,
            resources: recipe.resources.into(),
            network: recipe.network,
            environment: recipe.environment,
            command: recipe.command,
            targets: recipe.targets,
            scrape_interval: recipe.scrape_interval,
            retention: recipe.retention,
            prometheus: recipe.prometheus,
            grafana: recipe.grafana,
        }
    }
}
