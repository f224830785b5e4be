use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{resolve_resources, spec::scalar_map, ContainerSpec, RecipeMetadata};
use crate::model::vo::{FieldErrors, ResourceSpec, ResourceSpecDocument};

/// Where a client run sends its load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Literal base URL of the target service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// File containing an `ENDPOINT=<url>` line written by a server job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_file: Option<String>,
    /// Id of a running server instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Endpoint of the target service to use.
    #[serde(default = "TargetSpec::default_endpoint_name")]
    pub endpoint_name: String,
}

impl TargetSpec {
    fn default_endpoint_name() -> String {
        "api".to_owned()
    }
}

impl Default for TargetSpec {
    fn default() -> Self {
        Self {
            url: None,
            endpoint_file: None,
            service: None,
            endpoint_name: Self::default_endpoint_name(),
        }
    }
}

/// A bounded benchmark run producing a results file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ClientRecipeDocument")]
pub struct ClientRecipe {
    #[serde(flatten)]
    pub metadata: RecipeMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerSpec>,
    pub resources: ResourceSpec,
    pub target: TargetSpec,
    pub workload: BTreeMap<String, Value>,
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub output: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClientRecipeDocument {
    #[serde(flatten)]
    pub metadata: RecipeMetadata,
    #[serde(default)]
    pub container: Option<ContainerSpec>,
    #[serde(default)]
    pub resources: ResourceSpecDocument,
    #[serde(default)]
    pub target: TargetSpec,
    #[serde(default)]
    pub workload: BTreeMap<String, Value>,
    #[serde(default, deserialize_with = "scalar_map")]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub output: BTreeMap<String, Value>,
}

impl ClientRecipe {
    pub fn from_document(doc: ClientRecipeDocument) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::new();
        let resources = resolve_resources(doc.resources, &mut errors);
        let recipe = Self {
            metadata: doc.metadata,
            container: doc.container,
            resources: resources.unwrap_or_default(),
            target: doc.target,
            workload: doc.workload,
            environment: doc.environment,
            command: doc.command.filter(|c| !c.trim().is_empty()),
            output: doc.output,
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
        if let Some(url) = &self.target.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push("target.url", format_args!("`{url}` is not an http(s) URL"));
            }
        }
        if self.target.endpoint_name.trim().is_empty() {
            errors.push("target.endpoint_name", "must not be empty");
        }
    }
}

impl TryFrom<ClientRecipeDocument> for ClientRecipe {
    type Error = FieldErrors;

    fn try_from(doc: ClientRecipeDocument) -> Result<Self, Self::Error> {
        Self::from_document(doc)
    }
}

impl From<ClientRecipe> for ClientRecipeDocument {
    fn from(recipe: ClientRecipe) -> Self {
        Self {
            metadata: recipe.metadata,
            container: recipe.container,
            resources: recipe.resources.into(),
            target: recipe.target,
            workload: recipe.workload,
            environment: recipe.environment,
            command: recipe.command,
            output: recipe.output,
        }
    }
}
