use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::vo::{InstanceStatus, Recipe, RecipeKind};

/// Runtime record of one job started from a recipe: a service instance,
/// a client run or a monitor instance depending on the recipe kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub recipe_name: String,
    /// Snapshot of the recipe, overrides applied.
    pub recipe: Recipe,
    pub status: InstanceStatus,
    #[serde(default, alias = "slurm_job_id")]
    pub external_job_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "completed_at")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
}

impl Instance {
    /// A fresh `PENDING` record with a newly generated id.
    pub fn new(recipe: Recipe) -> Self {
        Self {
            id: Self::generate_id(),
            recipe_name: recipe.name().to_owned(),
            recipe,
            status: InstanceStatus::Pending,
            external_job_id: None,
            node: None,
            endpoints: BTreeMap::new(),
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
            error_message: None,
            work_dir: None,
            target_service_id: None,
            target_endpoint: None,
            results_path: None,
            targets: Vec::new(),
        }
    }

    /// First eight hex digits of a v4 UUID.
    pub fn generate_id() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_owned()
    }

    pub fn kind(&self) -> RecipeKind {
        self.recipe.kind()
    }

    pub fn endpoint(&self, name: &str) -> Option<&str> {
        self.endpoints.get(name).map(String::as_str)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
