use std::{path::Path, sync::Arc, time::Duration};

use domain_inference::{
    model::vo::RecipeKind,
    repository::{InstanceRepo, RecipeRepo},
    service::{CommandBuilderService, HealthCheckService, JobSchedulerService, LifecycleService},
};
use infrastructure_command::{CommandRunner, ProcessRunner, SshProxy};
use service_inference::{InstanceRegistry, LifecycleServiceImpl, RecipeLoader};

use super::{
    config::InferenceConfig,
    service::{
        container::ApptainerCommandBuilder, health_check::HttpHealthChecker,
        job_schedulers::slurm::SlurmClient,
    },
};

/// Every component built once from configuration and shared through `Arc`s.
#[derive(Clone)]
pub struct ServiceProvider {
    pub recipe_repo: Arc<dyn RecipeRepo>,
    pub server_lifecycle: Arc<dyn LifecycleService>,
    pub client_lifecycle: Arc<dyn LifecycleService>,
    pub monitor_lifecycle: Arc<dyn LifecycleService>,
}

impl ServiceProvider {
    pub async fn build(config: &InferenceConfig) -> anyhow::Result<Self> {
        let orchestrator = &config.orchestrator;
        let logs_dir = Path::new(&orchestrator.logs_dir);
        tokio::fs::create_dir_all(logs_dir).await?;

        let recipe_repo: Arc<dyn RecipeRepo> =
            Arc::new(RecipeLoader::new(&orchestrator.recipes_dir));
        let services: Arc<dyn InstanceRepo> = Arc::new(
            InstanceRegistry::open(RecipeKind::Server, logs_dir.join("service_registry.json")).await,
        );
        let runs: Arc<dyn InstanceRepo> = Arc::new(
            InstanceRegistry::open(RecipeKind::Client, logs_dir.join("run_registry.json")).await,
        );
        let monitors: Arc<dyn InstanceRepo> = Arc::new(
            InstanceRegistry::open(RecipeKind::Monitor, logs_dir.join("monitor_registry.json")).await,
        );

        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new(
            SshProxy::new(&orchestrator.slurm.ssh_proxy),
            Duration::from_secs(orchestrator.slurm.command_timeout_secs),
        ));
        let job_scheduler: Arc<dyn JobSchedulerService> = Arc::new(
            SlurmClient::builder()
                .runner(runner)
                .account(orchestrator.slurm.account.clone())
                .qos(orchestrator.slurm.qos.clone())
                .modules(orchestrator.slurm.modules.clone())
                .build(),
        );
        let command_builder: Arc<dyn CommandBuilderService> = Arc::new(
            ApptainerCommandBuilder::builder()
                .binds(orchestrator.container.binds.clone())
                .validate_image(orchestrator.container.validate_image)
                .default_target_endpoint(orchestrator.container.default_target_endpoint.clone())
                .build(),
        );
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .build()?;
        let health_checker: Arc<dyn HealthCheckService> =
            Arc::new(HttpHealthChecker::new(http_client));

        let settings = orchestrator.lifecycle_settings();
        let lifecycle = |kind: RecipeKind, registry: &Arc<dyn InstanceRepo>| -> Arc<dyn LifecycleService> {
            Arc::new(
                LifecycleServiceImpl::builder()
                    .kind(kind)
                    .recipe_repo(recipe_repo.clone())
                    .registry(registry.clone())
                    .services(services.clone())
                    .scheduler(job_scheduler.clone())
                    .command_builder(command_builder.clone())
                    .health_checker(health_checker.clone())
                    .settings(settings.clone())
                    .build(),
            )
        };

        Ok(Self {
            server_lifecycle: lifecycle(RecipeKind::Server, &services),
            client_lifecycle: lifecycle(RecipeKind::Client, &runs),
            monitor_lifecycle: lifecycle(RecipeKind::Monitor, &monitors),
            recipe_repo,
        })
    }

    pub fn lifecycle(&self, kind: RecipeKind) -> Arc<dyn LifecycleService> {
        match kind {
            RecipeKind::Server => self.server_lifecycle.clone(),
            RecipeKind::Client => self.client_lifecycle.clone(),
            RecipeKind::Monitor => self.monitor_lifecycle.clone(),
        }
    }
}
