mod client;
mod monitor;
mod server;
mod spec;

use std::{collections::BTreeMap, fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{FieldErrors, ResourceSpec};

#[rustfmt::skip]
pub use {
    client::{ClientRecipe, ClientRecipeDocument, TargetSpec},
    monitor::{MonitorRecipe, MonitorRecipeDocument},
    server::{ServerRecipe, ServerRecipeDocument},
    spec::{ContainerRuntime, ContainerSpec, HealthCheckSpec, MetricsSpec, NetworkSpec, PortSpec},
};

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid name pattern"));

/// Which kind of workload a recipe (and the instances started from it) describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeKind {
    Server,
    Client,
    Monitor,
}

impl RecipeKind {
    pub const ALL: [RecipeKind; 3] = [Self::Server, Self::Client, Self::Monitor];

    /// Sub-directory of the recipe store holding this kind.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Server => "servers",
            Self::Client => "clients",
            Self::Monitor => "monitors",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
            Self::Monitor => "monitor",
        }
    }
}

impl fmt::Display for RecipeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecipeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "server" | "servers" => Ok(Self::Server),
            "client" | "clients" => Ok(Self::Client),
            "monitor" | "monitors" => Ok(Self::Monitor),
            other => Err(format!("unknown recipe kind `{other}`")),
        }
    }
}

/// Fields shared by every recipe kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "RecipeMetadata::default_version")]
    pub version: String,
    #[serde(default, deserialize_with = "spec::scalar_map")]
    pub labels: BTreeMap<String, String>,
}

impl RecipeMetadata {
    fn default_version() -> String {
        "1.0.0".to_owned()
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            description: None,
            version: Self::default_version(),
            labels: BTreeMap::new(),
        }
    }

    pub(crate) fn validate(&self, errors: &mut FieldErrors) {
        if self.name.trim().is_empty() {
            errors.push("name", "is required");
        } else if !NAME_PATTERN.is_match(&self.name) {
            errors.push(
                "name",
                format_args!(
                    "`{}` may only contain letters, digits, `.`, `_` and `-`",
                    self.name
                ),
            );
        }
        if self.version.trim().is_empty() {
            errors.push("version", "must not be empty");
        }
    }
}

impl Default for RecipeMetadata {
    fn default() -> Self {
        Self::named("")
    }
}

/// Validated description of a workload, immutable once loaded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Recipe {
    Server(ServerRecipe),
    Client(ClientRecipe),
    Monitor(MonitorRecipe),
}

impl Recipe {
    pub fn kind(&self) -> RecipeKind {
        match self {
            Recipe::Server(_) => RecipeKind::Server,
            Recipe::Client(_) => RecipeKind::Client,
            Recipe::Monitor(_) => RecipeKind::Monitor,
        }
    }

    pub fn metadata(&self) -> &RecipeMetadata {
        match self {
            Recipe::Server(r) => &r.metadata,
            Recipe::Client(r) => &r.metadata,
            Recipe::Monitor(r) => &r.metadata,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata().name
    }

    pub fn resources(&self) -> &ResourceSpec {
        match self {
            Recipe::Server(r) => &r.resources,
            Recipe::Client(r) => &r.resources,
            Recipe::Monitor(r) => &r.resources,
        }
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        match self {
            Recipe::Server(r) => &r.environment,
            Recipe::Client(r) => &r.environment,
            Recipe::Monitor(r) => &r.environment,
        }
    }

    pub fn command(&self) -> Option<&str> {
        match self {
            Recipe::Server(r) => r.command.as_deref(),
            Recipe::Client(r) => r.command.as_deref(),
            Recipe::Monitor(r) => r.command.as_deref(),
        }
    }

    pub fn container(&self) -> Option<&ContainerSpec> {
        match self {
            Recipe::Server(r) => Some(&r.container),
            Recipe::Client(r) => r.container.as_ref(),
            Recipe::Monitor(r) => r.container.as_ref(),
        }
    }

    /// Declared ports; client runs expose none.
    pub fn network(&self) -> Option<&NetworkSpec> {
        match self {
            Recipe::Server(r) => Some(&r.network),
            Recipe::Client(_) => None,
            Recipe::Monitor(r) => Some(&r.network),
        }
    }

    pub fn validate(&self) -> Result<(), FieldErrors> {
        match self {
            Recipe::Server(r) => r.validate(),
            Recipe::Client(r) => r.validate(),
            Recipe::Monitor(r) => r.validate(),
        }
    }
}

impl From<ServerRecipe> for Recipe {
    fn from(value: ServerRecipe) -> Self {
        Recipe::Server(value)
    }
}

impl From<ClientRecipe> for Recipe {
    fn from(value: ClientRecipe) -> Self {
        Recipe::Client(value)
    }
}

impl From<MonitorRecipe> for Recipe {
    fn from(value: MonitorRecipe) -> Self {
        Recipe::Monitor(value)
    }
}

/// Turn the raw `resources` section into a validated spec, reporting field
/// errors under `resources.`.
pub(crate) fn resolve_resources(
    doc: super::ResourceSpecDocument,
    errors: &mut FieldErrors,
) -> Option<ResourceSpec> {
    match ResourceSpec::try_from(doc) {
        Ok(spec) => Some(spec),
        Err(nested) => {
            errors.extend_nested("resources", nested);
            None
        }
    }
}
