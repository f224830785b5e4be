use std::{path::PathBuf, time::Duration};

use domain_inference::{
    exception::InferenceResult,
    model::{
        entity::Instance,
        vo::{InstanceStatus, JobStatus, RecipeKind},
    },
};
use tokio::time::Instant;

use super::{LifecycleServiceImpl, RESULTS_FILE};

/// Result of one poll of a waited-on job.
enum Poll {
    Pending,
    Done(Instance),
    Failed(String),
}

impl LifecycleServiceImpl {
    /// Poll until the instance is ready (servers, monitors) or finished
    /// (clients), recording a failure or timeout on the instance.
    pub(super) async fn wait(&self, instance: Instance, timeout: Duration) -> InferenceResult<Instance> {
        let Some(job_id) = instance.external_job_id.clone() else {
            return Ok(instance);
        };
        let deadline = Instant::now() + timeout;
        loop {
            let poll = match self.kind {
                RecipeKind::Client => self.poll_completion(&instance, &job_id).await,
                RecipeKind::Server | RecipeKind::Monitor => self.poll_ready(&instance, &job_id).await,
            };
            match poll {
                Poll::Done(instance) => return Ok(instance),
                Poll::Failed(reason) => return Err(self.fail_start(&instance, reason).await),
                Poll::Pending => {}
            }
            let now = Instant::now();
            if now >= deadline {
                let verb = match self.kind {
                    RecipeKind::Client => "complete",
                    RecipeKind::Server | RecipeKind::Monitor => "become ready",
                };
                let reason = format!("did not {verb} within {}s", timeout.as_secs());
                return Err(self.fail_start(&instance, reason).await);
            }
            tokio::time::sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }

    async fn poll_ready(&self, instance: &Instance, job_id: &str) -> Poll {
        match self.scheduler.query_status(job_id).await {
            Ok(JobStatus::Running) => match self.scheduler.query_node(job_id).await {
                Ok(Some(node)) => match self.mark_running(&instance.id, Some(&node)).await {
                    Ok(ready) => {
                        tracing::info!("{} {} is ready on {node}", self.kind, instance.id);
                        Poll::Done(ready)
                    }
                    Err(e) => Poll::Failed(e.to_string()),
                },
                Ok(None) => Poll::Pending,
                Err(e) => {
                    tracing::debug!("Node of job {job_id} unavailable: {e}");
                    Poll::Pending
                }
            },
            Ok(JobStatus::Error) => {
                Poll::Failed(format!("scheduler reported job {job_id} as failed"))
            }
            Ok(JobStatus::Stopped) => {
                Poll::Failed(format!("job {job_id} exited before becoming ready"))
            }
            Ok(status) => {
                tracing::debug!("Job {job_id} is {status}, still waiting");
                Poll::Pending
            }
            Err(e) => {
                tracing::debug!("Status of job {job_id} unavailable: {e}");
                Poll::Pending
            }
        }
    }

    async fn poll_completion(&self, instance: &Instance, job_id: &str) -> Poll {
        match self.scheduler.query_status(job_id).await {
            Ok(JobStatus::Running) => {
                let node = self.scheduler.query_node(job_id).await.ok().flatten();
                match self.mark_running(&instance.id, node.as_deref()).await {
                    Ok(_) => Poll::Pending,
                    Err(e) => Poll::Failed(e.to_string()),
                }
            }
            Ok(JobStatus::Stopped) => {
                if !self.has_results(instance).await {
                    return Poll::Failed("no results generated".to_owned());
                }
                match self
                    .registry
                    .update_status(&instance.id, InstanceStatus::Completed, None)
                    .await
                {
                    Ok(done) => Poll::Done(done),
                    Err(e) => Poll::Failed(e.to_string()),
                }
            }
            Ok(JobStatus::Error) => {
                Poll::Failed(format!("scheduler reported job {job_id} as failed"))
            }
            Ok(_) => Poll::Pending,
            Err(e) => {
                tracing::debug!("Status of job {job_id} unavailable: {e}");
                Poll::Pending
            }
        }
    }

    /// Move to `RUNNING` and record the node, plus endpoints for servers
    /// and monitors. Both are set once; repeating is harmless.
    pub(super) async fn mark_running(&self, id: &str, node: Option<&str>) -> InferenceResult<Instance> {
        let mut instance = self
            .registry
            .update_status(id, InstanceStatus::Running, None)
            .await?;
        let Some(node) = node else {
            return Ok(instance);
        };
        if instance.node.as_deref() != Some(node) {
            instance = self.registry.update_node(id, node).await?;
        }
        if self.kind != RecipeKind::Client && instance.endpoints.is_empty() {
            let endpoints = super::endpoint_map(&instance.recipe, node);
            instance = self.registry.update_endpoints(id, endpoints).await?;
        }
        Ok(instance)
    }

    pub(super) async fn has_results(&self, instance: &Instance) -> bool {
        let Some(results_path) = &instance.results_path else {
            return false;
        };
        let file = PathBuf::from(results_path).join(RESULTS_FILE);
        tokio::fs::try_exists(&file).await.unwrap_or(false)
    }
}
