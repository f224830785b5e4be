use domain_inference::{
    exception::{InferenceException, InferenceResult},
    model::{
        entity::Instance,
        vo::{InstanceStatus, JobStatus, RecipeKind},
    },
};

use super::LifecycleServiceImpl;

impl LifecycleServiceImpl {
    /// Bring a non-terminal record in line with what the scheduler reports.
    /// Unknown states and moves the record cannot make leave it untouched.
    pub(super) async fn reconcile(
        &self,
        instance: Instance,
        job_status: JobStatus,
    ) -> InferenceResult<Instance> {
        let job_id = instance.external_job_id.clone().unwrap_or_default();
        let is_client = self.kind == RecipeKind::Client;
        let (status, message) = match job_status {
            JobStatus::Pending => (InstanceStatus::Queued, None),
            JobStatus::Running => (InstanceStatus::Running, None),
            JobStatus::Stopping if is_client => return Ok(instance),
            JobStatus::Stopping => (InstanceStatus::Stopping, None),
            JobStatus::Stopped if is_client => {
                if self.has_results(&instance).await {
                    (InstanceStatus::Completed, None)
                } else {
                    (InstanceStatus::Error, Some("no results generated".to_owned()))
                }
            }
            JobStatus::Stopped => (InstanceStatus::Stopped, None),
            JobStatus::Error => (
                InstanceStatus::Error,
                Some(format!("scheduler reported job {job_id} as failed")),
            ),
            JobStatus::Unknown => return Ok(instance),
        };

        let result = if status == InstanceStatus::Running {
            if instance.status == status && instance.node.is_some() {
                return Ok(instance);
            }
            let node = match self.scheduler.query_node(&job_id).await {
                Ok(node) => node,
                Err(e) => {
                    tracing::debug!("Node of job {job_id} unavailable: {e}");
                    None
                }
            };
            self.mark_running(&instance.id, node.as_deref()).await
        } else if status == instance.status {
            return Ok(instance);
        } else {
            self.registry.update_status(&instance.id, status, message).await
        };

        match result {
            Ok(updated) => Ok(updated),
            Err(InferenceException::InvalidTransition { id, from, to }) => {
                tracing::debug!("Skipping reconcile of {id}: {from} -> {to} not allowed");
                self.registry.get(&instance.id).await
            }
            Err(e) => Err(e),
        }
    }
}
