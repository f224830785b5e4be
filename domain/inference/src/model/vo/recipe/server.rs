use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{
    resolve_resources, spec::scalar_map, ContainerSpec, HealthCheckSpec, MetricsSpec,
    NetworkSpec, RecipeMetadata,
};
use crate::model::vo::{FieldErrors, ResourceSpec, ResourceSpecDocument};

/// A long-running inference service exposing network endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ServerRecipeDocument")]
pub struct ServerRecipe {
    #[serde(flatten)]
    pub metadata: RecipeMetadata,
    pub container: ContainerSpec,
    pub resources: ResourceSpec,
    pub network: NetworkSpec,
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub post_start: Vec<String>,
    pub healthcheck: HealthCheckSpec,
    pub metrics: MetricsSpec,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServerRecipeDocument {
    #[serde(flatten)]
    pub metadata: RecipeMetadata,
    #[serde(default)]
    pub container: Option<ContainerSpec>,
    #[serde(default)]
    pub resources: ResourceSpecDocument,
    #[serde(default)]
    pub network: NetworkSpec,
    #[serde(default, deserialize_with = "scalar_map")]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub post_start: Vec<String>,
    #[serde(default)]
    pub healthcheck: HealthCheckSpec,
    #[serde(default)]
    pub metrics: MetricsSpec,
}

impl ServerRecipe {
    pub fn from_document(doc: ServerRecipeDocument) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::new();
        let resources = resolve_resources(doc.resources, &mut errors);
        let recipe = Self {
            metadata: doc.metadata,
            container: doc.container.unwrap_or_default(),
            resources: resources.unwrap_or_default(),
            network: doc.network,
            environment: doc.environment,
            command: doc.command.filter(|c| !c.trim().is_empty()),
            post_start: doc.post_start,
            healthcheck: doc.healthcheck,
            metrics: doc.metrics,
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
        errors.extend_nested("container", self.container.validate());
        errors.extend_nested("network", self.network.validate());
        errors.extend_nested("healthcheck", self.healthcheck.validate());
        errors.extend_nested("metrics", self.metrics.validate());
    }
}

impl TryFrom<ServerRecipeDocument> for ServerRecipe {
    type Error = FieldErrors;

    fn try_from(doc: ServerRecipeDocument) -> Result<Self, Self::Error> {
        Self::from_document(doc)
    }
}

impl From<ServerRecipe> for ServerRecipeDocument {
    fn from(recipe: ServerRecipe) -> Self {
        Self {
            metadata: recipe.metadata,
            container: Some(recipe.container),
            resources: recipe.resources.into(),
            network: recipe.network,
            environment: recipe.environment,
            command: recipe.command,
            post_start: recipe.post_start,
            healthcheck: recipe.healthcheck,
            metrics: recipe.metrics,
        }
    }
}
