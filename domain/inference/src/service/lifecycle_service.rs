use std::time::Duration;

use serde_json::Value;

use crate::exception::InferenceResult;
use crate::model::{
    entity::Instance,
    vo::{HealthReport, LogStream, RecipeKind, StartRequest},
};

/// Drives instances of one recipe kind from submission to a terminal status.
#[async_trait::async_trait]
pub trait LifecycleService: Send + Sync {
    fn kind(&self) -> RecipeKind;
    async fn list_recipes(&self) -> InferenceResult<Vec<String>>;
    async fn start(&self, request: StartRequest) -> InferenceResult<Instance>;
    /// `id` may also be the scheduler's job id.
    async fn stop(&self, id: &str, force: bool) -> InferenceResult<bool>;
    /// Reconciles non-terminal instances with the scheduler before returning.
    async fn get_status(&self, id: &str) -> InferenceResult<Instance>;
    async fn list_instances(&self, active_only: bool) -> InferenceResult<Vec<Instance>>;
    async fn get_logs(&self, id: &str, stream: LogStream, lines: usize)
        -> InferenceResult<String>;
    /// Parsed results of a client run, `None` when absent or not a client.
    async fn get_results(&self, id: &str) -> InferenceResult<Option<Value>>;
    async fn check_health(&self, id: &str) -> InferenceResult<HealthReport>;
    async fn cleanup(&self, max_age: Duration) -> InferenceResult<usize>;
}
