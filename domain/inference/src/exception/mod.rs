use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::model::vo::{InstanceStatus, RecipeKind};

pub type InferenceResult<T> = Result<T, InferenceException>;

#[derive(Error, Debug)]
pub enum InferenceException {
    #[error("Recipe not found: {kind}/{name}")]
    RecipeNotFound { kind: RecipeKind, name: String },

    #[error("Failed to parse recipe {path}: {reason}")]
    RecipeParse { path: String, reason: String },

    #[error("Recipe validation failed for {name}: {}", errors.join("; "))]
    RecipeValidation { name: String, errors: Vec<String> },

    #[error("Service not found: {id}")]
    ServiceNotFound { id: String },

    #[error("Client run not found: {id}")]
    ClientNotFound { id: String },

    #[error("Monitor not found: {id}")]
    MonitorNotFound { id: String },

    #[error("Failed to start {recipe_name}: {reason}")]
    Start {
        recipe_name: String,
        instance_id: Option<String>,
        reason: String,
    },

    #[error("Failed to stop {id}: {reason}")]
    Stop { id: String, reason: String },

    #[error("Scheduler {operation} failed: {reason}")]
    Orchestrator {
        operation: String,
        reason: String,
        job_id: Option<String>,
    },

    #[error("Container {operation} failed for image {image}: {reason}")]
    Container {
        operation: String,
        image: String,
        reason: String,
    },

    #[error("Invalid configuration for {setting}: {reason}")]
    Configuration { setting: String, reason: String },

    #[error("Instance {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: InstanceStatus,
        to: InstanceStatus,
    },

    #[error("Inference internal error: {source}")]
    InternalError {
        #[source]
        source: anyhow::Error,
    },
}

impl InferenceException {
    /// Stable, machine-readable name of the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RecipeNotFound { .. } => "recipe_not_found",
            Self::RecipeParse { .. } => "recipe_parse_error",
            Self::RecipeValidation { .. } => "recipe_validation_error",
            Self::ServiceNotFound { .. } => "service_not_found",
            Self::ClientNotFound { .. } => "client_not_found",
            Self::MonitorNotFound { .. } => "monitor_not_found",
            Self::Start { .. } => "start_error",
            Self::Stop { .. } => "stop_error",
            Self::Orchestrator { .. } => "orchestrator_error",
            Self::Container { .. } => "container_error",
            Self::Configuration { .. } => "configuration_error",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InternalError { .. } => "internal_error",
        }
    }

    /// Structured context for presentation layers.
    pub fn details(&self) -> Map<String, Value> {
        let value = match self {
            Self::RecipeNotFound { kind, name } => json!({ "kind": kind, "name": name }),
            Self::RecipeParse { path, reason } => json!({ "path": path, "reason": reason }),
            Self::RecipeValidation { name, errors } => json!({ "name": name, "errors": errors }),
            Self::ServiceNotFound { id }
            | Self::ClientNotFound { id }
            | Self::MonitorNotFound { id } => json!({ "id": id }),
            Self::Start {
                recipe_name,
                instance_id,
                reason,
            } => json!({
                "recipe_name": recipe_name,
                "instance_id": instance_id,
                "reason": reason,
            }),
            Self::Stop { id, reason } => json!({ "id": id, "reason": reason }),
            Self::Orchestrator {
                operation,
                reason,
                job_id,
            } => json!({ "operation": operation, "reason": reason, "job_id": job_id }),
            Self::Container {
                operation,
                image,
                reason,
            } => json!({ "operation": operation, "image": image, "reason": reason }),
            Self::Configuration { setting, reason } => {
                json!({ "setting": setting, "reason": reason })
            }
            Self::InvalidTransition { id, from, to } => {
                json!({ "id": id, "from": from, "to": to })
            }
            Self::InternalError { source } => json!({ "reason": format!("{source:#}") }),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    pub fn orchestrator(operation: &str, reason: impl ToString, job_id: Option<&str>) -> Self {
        Self::Orchestrator {
            operation: operation.to_owned(),
            reason: reason.to_string(),
            job_id: job_id.map(ToOwned::to_owned),
        }
    }

    /// The not-found error matching the registry that failed the lookup.
    pub fn not_found(kind: RecipeKind, id: &str) -> Self {
        let id = id.to_owned();
        match kind {
            RecipeKind::Server => Self::ServiceNotFound { id },
            RecipeKind::Client => Self::ClientNotFound { id },
            RecipeKind::Monitor => Self::MonitorNotFound { id },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ServiceNotFound { .. } | Self::ClientNotFound { .. } | Self::MonitorNotFound { .. }
        )
    }
}

impl From<anyhow::Error> for InferenceException {
    fn from(e: anyhow::Error) -> Self {
        InferenceException::InternalError { source: e }
    }
}
