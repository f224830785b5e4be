mod endpoint;
mod reconcile;
mod wait;

use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use domain_inference::{
    exception::{InferenceException, InferenceResult},
    model::{
        entity::Instance,
        vo::{
            ClientRecipe, HealthReport, InstanceStatus, LogStream, MonitorRecipe, Recipe,
            RecipeKind, ScriptInfo, StartRequest,
        },
    },
    repository::{InstanceRepo, RecipeRepo},
    service::{CommandBuilderService, HealthCheckService, JobSchedulerService, LifecycleService},
};
use serde_json::Value;
use typed_builder::TypedBuilder;

use crate::target::resolve_target;

pub(crate) use self::endpoint::endpoint_map;

/// File a benchmark client writes into its results directory.
pub const RESULTS_FILE: &str = "benchmark_results.json";

/// Directories and polling knobs shared by every lifecycle service.
#[derive(Clone, Debug)]
pub struct LifecycleSettings {
    /// Batch scripts and job output go to `<logs_dir>/<kind>/<instance id>`.
    pub logs_dir: PathBuf,
    /// Client runs write to `<results_dir>/<instance id>`.
    pub results_dir: PathBuf,
    /// Server jobs publish `<endpoint_dir>/<instance id>_endpoint.txt`.
    pub endpoint_dir: PathBuf,
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
    pub completion_timeout: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            results_dir: PathBuf::from("results"),
            endpoint_dir: PathBuf::from("endpoints"),
            poll_interval: Duration::from_secs(5),
            ready_timeout: Duration::from_secs(300),
            completion_timeout: Duration::from_secs(3600),
        }
    }
}

/// Lifecycle of one recipe kind. Server instances are looked up through
/// `services`, which is the same registry as `registry` for servers.
#[derive(TypedBuilder)]
pub struct LifecycleServiceImpl {
    kind: RecipeKind,
    recipe_repo: Arc<dyn RecipeRepo>,
    registry: Arc<dyn InstanceRepo>,
    services: Arc<dyn InstanceRepo>,
    scheduler: Arc<dyn JobSchedulerService>,
    command_builder: Arc<dyn CommandBuilderService>,
    health_checker: Arc<dyn HealthCheckService>,
    #[builder(default)]
    settings: LifecycleSettings,
}

/// What `submit` needs besides the instance record.
#[derive(Default)]
struct JobPayload {
    environment: BTreeMap<String, String>,
    setup_commands: Vec<String>,
}

impl LifecycleServiceImpl {
    /// Lookup by instance id, then by scheduler job id.
    async fn find(&self, id: &str) -> InferenceResult<Instance> {
        match self.registry.get(id).await {
            Ok(instance) => Ok(instance),
            Err(e) if e.is_not_found() => self.registry.get_by_external_job_id(id).await?.ok_or(e),
            Err(e) => Err(e),
        }
    }

    fn work_dir(&self, instance: &Instance) -> PathBuf {
        instance.work_dir.as_ref().map(PathBuf::from).unwrap_or_else(|| {
            self.settings
                .logs_dir
                .join(self.kind.dir_name())
                .join(&instance.id)
        })
    }

    fn job_name(instance: &Instance) -> String {
        format!("{}_{}", instance.recipe_name, instance.id)
    }

    /// Record a failed start on the instance and build the matching error.
    async fn fail_start(&self, instance: &Instance, reason: String) -> InferenceException {
        tracing::error!("Start of {} {} failed: {reason}", self.kind, instance.id);
        if let Err(e) = self
            .registry
            .update_status(&instance.id, InstanceStatus::Error, Some(reason.clone()))
            .await
        {
            tracing::warn!("Could not record failure of {}: {e}", instance.id);
        }
        InferenceException::Start {
            recipe_name: instance.recipe_name.clone(),
            instance_id: Some(instance.id.clone()),
            reason,
        }
    }

    /// Fill the kind specific parts of a fresh record and the job payload.
    async fn prepare(
        &self,
        instance: &mut Instance,
        request: &StartRequest,
    ) -> InferenceResult<JobPayload> {
        let mut payload = JobPayload {
            environment: instance.recipe.environment().clone(),
            ..Default::default()
        };
        match instance.recipe.clone() {
            Recipe::Server(recipe) => {
                payload.setup_commands =
                    endpoint::endpoint_file_setup(&instance.id, &recipe, &self.settings.endpoint_dir);
                payload.setup_commands.extend(recipe.post_start);
            }
            Recipe::Client(recipe) => {
                self.prepare_client(instance, &recipe, request, &mut payload).await?
            }
            Recipe::Monitor(recipe) => {
                self.prepare_monitor(instance, &recipe, request, &mut payload).await?
            }
        }
        Ok(payload)
    }

    async fn prepare_client(
        &self,
        instance: &mut Instance,
        recipe: &ClientRecipe,
        request: &StartRequest,
        payload: &mut JobPayload,
    ) -> InferenceResult<()> {
        if let Some(target) =
            resolve_target(self.services.as_ref(), &recipe.target, request.target.as_deref()).await?
        {
            tracing::info!("Client run {} targets {}", instance.id, target.endpoint);
            payload
                .environment
                .insert("TARGET_ENDPOINT".to_owned(), target.endpoint.clone());
            instance.target_endpoint = Some(target.endpoint);
            instance.target_service_id = target.service_id;
        }
        let results_path = self.settings.results_dir.join(&instance.id);
        tokio::fs::create_dir_all(&results_path)
            .await
            .with_context(|| format!("Failed to create {}", results_path.display()))?;
        let workload =
            serde_json::to_string(&recipe.workload).context("Failed to encode workload")?;
        payload
            .environment
            .insert("RESULTS_DIR".to_owned(), results_path.display().to_string());
        payload
            .environment
            .insert("INFERBENCH_WORKLOAD".to_owned(), workload);
        instance.results_path = Some(results_path.display().to_string());
        Ok(())
    }

    async fn prepare_monitor(
        &self,
        instance: &mut Instance,
        recipe: &MonitorRecipe,
        request: &StartRequest,
        payload: &mut JobPayload,
    ) -> InferenceResult<()> {
        let mut requested: Vec<&String> = Vec::new();
        for id in recipe.targets.iter().chain(&request.targets) {
            if !requested.contains(&id) {
                requested.push(id);
            }
        }
        let candidates = if requested.is_empty() {
            self.services.get_running().await?
        } else {
            let mut found = Vec::with_capacity(requested.len());
            for id in requested {
                match self.services.get(id).await {
                    Ok(service) => found.push(service),
                    Err(e) if e.is_not_found() => tracing::warn!("Monitor target {id} skipped: {e}"),
                    Err(e) => return Err(e),
                }
            }
            found
        };
        let scraped: Vec<(String, &Instance)> = candidates
            .iter()
            .filter_map(|service| match endpoint::scrape_address(service) {
                Some(address) => Some((address, service)),
                None => {
                    tracing::warn!(
                        "Monitor target {} skipped: not running with metrics enabled",
                        service.id
                    );
                    None
                }
            })
            .collect();

        let work_dir = self.work_dir(instance);
        tokio::fs::create_dir_all(&work_dir)
            .await
            .with_context(|| format!("Failed to create {}", work_dir.display()))?;
        let targets_file = work_dir.join("targets.json");
        let config = serde_json::to_vec_pretty(&endpoint::scrape_config(&scraped))
            .context("Failed to encode scrape targets")?;
        tokio::fs::write(&targets_file, config)
            .await
            .with_context(|| format!("Failed to write {}", targets_file.display()))?;

        let addresses: Vec<&str> = scraped.iter().map(|(a, _)| a.as_str()).collect();
        tracing::info!("Monitor {} scrapes [{}]", instance.id, addresses.join(", "));
        payload
            .environment
            .insert("MONITOR_TARGETS".to_owned(), addresses.join(","));
        payload.environment.insert(
            "MONITOR_TARGETS_FILE".to_owned(),
            targets_file.display().to_string(),
        );
        instance.targets = scraped.iter().map(|(_, s)| s.id.clone()).collect();
        Ok(())
    }

    /// Build and submit the job of a registered record. A record that went
    /// terminal while `sbatch` ran keeps its status and the new job is cancelled.
    async fn submit(&self, instance: &Instance, payload: JobPayload) -> InferenceResult<Instance> {
        let command = self
            .command_builder
            .build_command(&instance.recipe, &payload.environment)?;
        let job_name = Self::job_name(instance);
        let work_dir = self.work_dir(instance);
        let script_info = ScriptInfo::builder()
            .job_name(job_name.clone())
            .command(command)
            .resources(instance.recipe.resources().clone())
            .environment(payload.environment)
            .output_dir(work_dir.clone())
            .setup_commands(payload.setup_commands)
            .build();
        let script = self.scheduler.render_script(&script_info);
        let job_id = self
            .scheduler
            .submit_job(&script, &work_dir, &format!("{job_name}.sh"))
            .await?;
        tracing::info!("{} {} submitted as job {job_id}", self.kind, instance.id);
        self.registry
            .update_external_job_id(&instance.id, &job_id)
            .await?;
        match self
            .registry
            .update_status(&instance.id, InstanceStatus::Queued, None)
            .await
        {
            Err(InferenceException::InvalidTransition { from, .. }) => {
                tracing::warn!(
                    "{} {} became {from} during submission, cancelling job {job_id}",
                    self.kind,
                    instance.id
                );
                if !self.scheduler.cancel_job(&job_id).await {
                    tracing::error!("Job {job_id} of {} {} is left running", self.kind, instance.id);
                }
                self.registry.get(&instance.id).await
            }
            queued => queued,
        }
    }
}

#[async_trait]
impl LifecycleService for LifecycleServiceImpl {
    fn kind(&self) -> RecipeKind {
        self.kind
    }

    async fn list_recipes(&self) -> InferenceResult<Vec<String>> {
        self.recipe_repo.list(self.kind).await
    }

    async fn start(&self, request: StartRequest) -> InferenceResult<Instance> {
        let recipe = self
            .recipe_repo
            .load(self.kind, &request.recipe_name)
            .await?;
        let recipe = match &request.overrides {
            Some(patch) => self.recipe_repo.apply_overrides(&recipe, patch)?,
            None => recipe,
        };

        let mut instance = Instance::new(recipe);
        while self.registry.contains(&instance.id).await? {
            instance.id = Instance::generate_id();
        }
        instance.status = InstanceStatus::Submitted;
        instance.work_dir = Some(self.work_dir(&instance).display().to_string());
        tracing::info!(
            "Starting {} {} from recipe {}",
            self.kind,
            instance.id,
            instance.recipe_name
        );
        // registered once prepared; later changes are status checked updates
        let prepared = self.prepare(&mut instance, &request).await;
        self.registry.register(&instance).await?;

        let submitted = match prepared {
            Ok(payload) => self.submit(&instance, payload).await,
            Err(e) => Err(e),
        };
        let queued = match submitted {
            Ok(queued) => queued,
            Err(e) => return Err(self.fail_start(&instance, e.to_string()).await),
        };
        if !request.wait || queued.is_terminal() {
            return Ok(queued);
        }
        let timeout = request.timeout.unwrap_or(match self.kind {
            RecipeKind::Client => self.settings.completion_timeout,
            RecipeKind::Server | RecipeKind::Monitor => self.settings.ready_timeout,
        });
        self.wait(queued, timeout).await
    }

    async fn stop(&self, id: &str, force: bool) -> InferenceResult<bool> {
        let instance = self.find(id).await?;
        if instance.is_terminal() {
            return Ok(true);
        }
        match self
            .registry
            .update_status(&instance.id, InstanceStatus::Stopping, None)
            .await
        {
            Ok(_) => {}
            Err(InferenceException::InvalidTransition { .. }) => return Ok(true),
            Err(e) => return Err(e),
        }

        if let Some(job_id) = &instance.external_job_id {
            if !self.scheduler.cancel_job(job_id).await {
                let reason = format!("scheduler refused to cancel job {job_id}");
                if !force {
                    if let Err(e) = self
                        .registry
                        .update_status(&instance.id, InstanceStatus::Error, Some(reason.clone()))
                        .await
                    {
                        tracing::warn!("Could not record failure of {}: {e}", instance.id);
                    }
                    return Err(InferenceException::Stop {
                        id: instance.id,
                        reason,
                    });
                }
                tracing::warn!("{reason}; marking {} stopped anyway", instance.id);
            }
        }

        let stopped = match self.kind {
            RecipeKind::Client => InstanceStatus::Canceled,
            RecipeKind::Server | RecipeKind::Monitor => InstanceStatus::Stopped,
        };
        match self.registry.update_status(&instance.id, stopped, None).await {
            Ok(_) | Err(InferenceException::InvalidTransition { .. }) => {
                tracing::info!("{} {} stopped", self.kind, instance.id);
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_status(&self, id: &str) -> InferenceResult<Instance> {
        let instance = self.find(id).await?;
        let Some(job_id) = instance.external_job_id.clone() else {
            return Ok(instance);
        };
        if instance.is_terminal() {
            return Ok(instance);
        }
        match self.scheduler.query_status(&job_id).await {
            Ok(job_status) => self.reconcile(instance, job_status).await,
            Err(e) => {
                tracing::debug!("Status of job {job_id} unavailable: {e}");
                Ok(instance)
            }
        }
    }

    async fn list_instances(&self, active_only: bool) -> InferenceResult<Vec<Instance>> {
        let mut instances = if active_only {
            self.registry.get_active().await?
        } else {
            self.registry.get_all().await?
        };
        instances.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(instances)
    }

    async fn get_logs(&self, id: &str, stream: LogStream, lines: usize) -> InferenceResult<String> {
        let instance = self.find(id).await?;
        let Some(job_id) = &instance.external_job_id else {
            return Ok(String::new());
        };
        self.scheduler
            .read_output(job_id, &self.work_dir(&instance), stream, lines)
            .await
    }

    async fn get_results(&self, id: &str) -> InferenceResult<Option<Value>> {
        let instance = self.find(id).await?;
        let Some(results_path) = &instance.results_path else {
            return Ok(None);
        };
        let file = PathBuf::from(results_path).join(RESULTS_FILE);
        let content = match tokio::fs::read(&file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to read {}", file.display()))
                    .into())
            }
        };
        let results = serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse {}", file.display()))?;
        Ok(Some(results))
    }

    async fn check_health(&self, id: &str) -> InferenceResult<HealthReport> {
        let instance = self.get_status(id).await?;
        let Recipe::Server(recipe) = &instance.recipe else {
            return Ok(HealthReport::unhealthy(
                instance.status,
                format!("{} instances have no health check", instance.kind()),
            ));
        };
        if instance.status != InstanceStatus::Running {
            return Ok(HealthReport::unhealthy(
                instance.status,
                format!("instance is {}", instance.status),
            ));
        }
        let Some(node) = &instance.node else {
            return Ok(HealthReport::unhealthy(instance.status, "no node assigned yet"));
        };
        let hc = &recipe.healthcheck;
        let url = format!("http://{node}:{}{}", hc.port, hc.endpoint);
        if !hc.enabled {
            return Ok(HealthReport {
                healthy: true,
                status: instance.status,
                status_code: None,
                endpoint: Some(url),
                message: Some("health check disabled".to_owned()),
            });
        }

        let mut report = HealthReport::unhealthy(instance.status, "no probe attempted");
        report.endpoint = Some(url.clone());
        for attempt in 1..=hc.retries.max(1) {
            match self
                .health_checker
                .probe(&url, Duration::from_secs(hc.timeout))
                .await
            {
                Ok(code) if (200..300).contains(&code) => {
                    report.healthy = true;
                    report.status_code = Some(code);
                    report.message = None;
                    return Ok(report);
                }
                Ok(code) => {
                    report.status_code = Some(code);
                    report.message = Some(format!("{url} answered HTTP {code}"));
                }
                Err(e) => report.message = Some(e.to_string()),
            }
            tracing::debug!("Health probe {attempt}/{} of {} failed", hc.retries, instance.id);
        }
        Ok(report)
    }

    async fn cleanup(&self, max_age: Duration) -> InferenceResult<usize> {
        let removed = self.registry.cleanup_stale(max_age).await?;
        if removed > 0 {
            tracing::info!("Removed {removed} stale {} record(s)", self.kind);
        }
        Ok(removed)
    }
}
