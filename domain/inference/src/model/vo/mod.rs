pub mod patch;
mod recipe;
mod resource;
mod script;
mod status;
mod validation;

#[rustfmt::skip]
pub use {
    patch::RecipePatch,
    recipe::*,
    resource::{Memory, ResourceSpec, ResourceSpecDocument, WallTime},
    script::{HealthReport, LogStream, ScriptInfo, StartRequest},
    status::{InstanceStatus, JobStatus},
    validation::FieldErrors,
};
