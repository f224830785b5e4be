use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;

use crate::{
    exception::InferenceResult,
    model::{
        entity::Instance,
        vo::{InstanceStatus, RecipeKind},
    },
};

/// Store of instance records of one kind. All mutations go through it so
/// status timestamps and persistence stay consistent.
#[async_trait]
pub trait InstanceRepo: Send + Sync {
    /// Kind of the instances kept here; decides the not-found error.
    fn kind(&self) -> RecipeKind;

    /// Insert or replace by id.
    async fn register(&self, instance: &Instance) -> InferenceResult<()>;

    async fn get(&self, id: &str) -> InferenceResult<Instance>;

    async fn get_by_external_job_id(&self, job_id: &str) -> InferenceResult<Option<Instance>>;

    async fn get_all(&self) -> InferenceResult<Vec<Instance>>;

    async fn get_running(&self) -> InferenceResult<Vec<Instance>>;

    /// Every instance not yet in a terminal status.
    async fn get_active(&self) -> InferenceResult<Vec<Instance>>;

    async fn get_by_recipe(&self, recipe_name: &str) -> InferenceResult<Vec<Instance>>;

    async fn contains(&self, id: &str) -> InferenceResult<bool>;

    /// Move to `status`, stamping `started_at`/`stopped_at`. Backward moves
    /// fail with `InvalidTransition`.
    async fn update_status(
        &self,
        id: &str,
        status: InstanceStatus,
        error_message: Option<String>,
    ) -> InferenceResult<Instance>;

    async fn update_external_job_id(&self, id: &str, job_id: &str) -> InferenceResult<Instance>;

    /// Set once, only once the instance is running.
    async fn update_node(&self, id: &str, node: &str) -> InferenceResult<Instance>;

    /// Set once, only once the instance is running.
    async fn update_endpoints(
        &self,
        id: &str,
        endpoints: BTreeMap<String, String>,
    ) -> InferenceResult<Instance>;

    async fn unregister(&self, id: &str) -> InferenceResult<bool>;

    /// Remove terminal instances stopped more than `max_age` ago.
    async fn cleanup_stale(&self, max_age: Duration) -> InferenceResult<usize>;
}
