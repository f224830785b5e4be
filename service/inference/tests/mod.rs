use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use domain_inference::{
    exception::InferenceException,
    mock::{MockCommandBuilderService, MockHealthCheckService, MockJobSchedulerService, MockRecipeRepo},
    model::{
        entity::Instance,
        vo::{
            ClientRecipe, ClientRecipeDocument, InstanceStatus, JobStatus, MonitorRecipe,
            MonitorRecipeDocument, Recipe, RecipeKind, ServerRecipe, ServerRecipeDocument,
            StartRequest,
        },
    },
    repository::InstanceRepo,
    service::LifecycleService,
};
use indoc::indoc;
use service_inference::{InstanceRegistry, LifecycleServiceImpl, LifecycleSettings, RESULTS_FILE};
use tempfile::TempDir;

fn test_server() -> Recipe {
    let doc: ServerRecipeDocument = serde_yaml::from_str(indoc! {r#"
        name: test-server
        container:
          image: /images/vllm.sif
        resources:
          nodes: 1
          gpus: 1
          memory: 32G
        healthcheck:
          retries: 3
    "#})
    .unwrap();
    Recipe::Server(ServerRecipe::from_document(doc).unwrap())
}

fn benchmark_client(target_url: Option<&str>) -> Recipe {
    let mut doc: ClientRecipeDocument = serde_yaml::from_str(indoc! {r#"
        name: load-test
        workload:
          requests: 100
          concurrency: 8
    "#})
    .unwrap();
    doc.target.url = target_url.map(ToOwned::to_owned);
    Recipe::Client(ClientRecipe::from_document(doc).unwrap())
}

fn monitor() -> Recipe {
    let doc: MonitorRecipeDocument = serde_yaml::from_str("name: stack\n").unwrap();
    Recipe::Monitor(MonitorRecipe::from_document(doc).unwrap())
}

struct Fixture {
    dir: TempDir,
    registry: Arc<InstanceRegistry>,
    services: Arc<InstanceRegistry>,
    recipes: MockRecipeRepo,
    scheduler: MockJobSchedulerService,
    command_builder: MockCommandBuilderService,
    health_checker: MockHealthCheckService,
}

impl Fixture {
    fn new(recipe: Recipe) -> Self {
        let kind = recipe.kind();
        let registry = Arc::new(InstanceRegistry::in_memory(kind));
        let services = match kind {
            RecipeKind::Server => registry.clone(),
            _ => Arc::new(InstanceRegistry::in_memory(RecipeKind::Server)),
        };
        let mut recipes = MockRecipeRepo::new();
        recipes.expect_load().returning(move |_, _| Ok(recipe.clone()));
        Self {
            dir: tempfile::tempdir().unwrap(),
            registry,
            services,
            recipes,
            scheduler: MockJobSchedulerService::new(),
            command_builder: MockCommandBuilderService::new(),
            health_checker: MockHealthCheckService::new(),
        }
    }

    fn path(&self, sub: &str) -> std::path::PathBuf {
        self.dir.path().join(sub)
    }

    fn build(self) -> (LifecycleServiceImpl, Arc<InstanceRegistry>, Arc<InstanceRegistry>, TempDir) {
        let settings = LifecycleSettings {
            logs_dir: self.path("logs"),
            results_dir: self.path("results"),
            endpoint_dir: self.path("endpoints"),
            ..Default::default()
        };
        let service = LifecycleServiceImpl::builder()
            .kind(self.registry.kind())
            .recipe_repo(Arc::new(self.recipes))
            .registry(self.registry.clone())
            .services(self.services.clone())
            .scheduler(Arc::new(self.scheduler))
            .command_builder(Arc::new(self.command_builder))
            .health_checker(Arc::new(self.health_checker))
            .settings(settings)
            .build();
        (service, self.registry, self.services, self.dir)
    }
}

/// Scheduler mock whose reported state the test can change.
fn scripted_scheduler(fixture: &mut Fixture, job_id: &'static str) -> Arc<Mutex<JobStatus>> {
    let state = Arc::new(Mutex::new(JobStatus::Pending));
    let reported = state.clone();
    fixture
        .scheduler
        .expect_submit_job()
        .returning(move |_, _, _| Ok(job_id.to_owned()));
    fixture
        .scheduler
        .expect_query_status()
        .returning(move |_| Ok(*reported.lock().unwrap()));
    fixture
        .scheduler
        .expect_query_node()
        .returning(|_| Ok(Some("mel2091".to_owned())));
    state
}

fn render_plain(fixture: &mut Fixture) {
    fixture
        .scheduler
        .expect_render_script()
        .returning(|info| format!("#!/bin/bash\n{}\n", info.command));
}

fn run_command(fixture: &mut Fixture) {
    render_plain(fixture);
    fixture
        .command_builder
        .expect_build_command()
        .returning(|_, _| Ok("apptainer run /images/vllm.sif".to_owned()));
}

#[tokio::test]
async fn test_server_becomes_ready_with_endpoints() {
    let mut fixture = Fixture::new(test_server());
    fixture
        .command_builder
        .expect_build_command()
        .returning(|_, _| Ok("apptainer run /images/vllm.sif".to_owned()));
    let endpoint_file = fixture.path("endpoints").display().to_string();
    fixture.scheduler.expect_render_script().returning(move |info| {
        assert_eq!(info.resources.nodes(), 1);
        assert_eq!(info.resources.gres().as_deref(), Some("gpu:1"));
        assert_eq!(info.resources.memory().as_str(), "32G");
        assert!(info.setup_commands.iter().any(|line| {
            line.contains("ENDPOINT=http://$SLURM_NODELIST:8000") && line.contains(&endpoint_file)
        }));
        "#!/bin/bash\n".to_owned()
    });
    let state = scripted_scheduler(&mut fixture, "12345678");
    *state.lock().unwrap() = JobStatus::Running;
    let (service, registry, _, _dir) = fixture.build();

    let instance = service
        .start(StartRequest::builder().recipe_name("test-server").wait(true).build())
        .await
        .unwrap();

    assert_eq!(instance.status, InstanceStatus::Running);
    assert_eq!(instance.external_job_id.as_deref(), Some("12345678"));
    assert_eq!(instance.node.as_deref(), Some("mel2091"));
    assert_eq!(instance.endpoint("api"), Some("http://mel2091:8000"));
    assert!(instance.started_at.is_some());
    assert_eq!(registry.get(&instance.id).await.unwrap(), instance);
}

#[tokio::test(start_paused = true)]
async fn pending_job_times_out_and_is_recorded_as_error() {
    let mut fixture = Fixture::new(test_server());
    run_command(&mut fixture);
    scripted_scheduler(&mut fixture, "12345678");
    let (service, registry, _, _dir) = fixture.build();

    let err = service
        .start(
            StartRequest::builder()
                .recipe_name("test-server")
                .wait(true)
                .timeout(Duration::from_secs(60))
                .build(),
        )
        .await
        .unwrap_err();

    let InferenceException::Start { instance_id, reason, .. } = err else {
        panic!("expected a start error");
    };
    assert_eq!(reason, "did not become ready within 60s");
    let instance = registry.get(&instance_id.unwrap()).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Error);
    assert_eq!(instance.error_message.as_deref(), Some(reason.as_str()));
    assert!(instance.stopped_at.is_some());
}

#[tokio::test]
async fn job_exiting_before_ready_fails_the_start() {
    let mut fixture = Fixture::new(test_server());
    run_command(&mut fixture);
    let state = scripted_scheduler(&mut fixture, "4242");
    *state.lock().unwrap() = JobStatus::Stopped;
    let (service, registry, _, _dir) = fixture.build();

    let err = service
        .start(StartRequest::builder().recipe_name("test-server").wait(true).build())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("job 4242 exited before becoming ready"));
    let instances = registry.get_all().await.unwrap();
    assert_eq!(instances[0].status, InstanceStatus::Error);
}

#[tokio::test]
async fn submission_failure_is_recorded_with_the_same_reason() {
    let mut fixture = Fixture::new(test_server());
    run_command(&mut fixture);
    fixture.scheduler.expect_submit_job().returning(|_, _, _| {
        Err(InferenceException::orchestrator(
            "submit",
            "sbatch: error: invalid partition specified: gpu",
            None,
        ))
    });
    let (service, registry, _, _dir) = fixture.build();

    let err = service
        .start(StartRequest::builder().recipe_name("test-server").build())
        .await
        .unwrap_err();
    let InferenceException::Start { instance_id, reason, .. } = err else {
        panic!("expected a start error");
    };
    assert!(reason.contains("invalid partition"));
    let instance = registry.get(&instance_id.unwrap()).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Error);
    assert_eq!(instance.error_message, Some(reason));
}

#[tokio::test]
async fn recipe_errors_surface_without_creating_instances() {
    let mut fixture = Fixture::new(test_server());
    fixture.recipes.checkpoint();
    fixture.recipes.expect_load().returning(|kind, name| {
        Err(InferenceException::RecipeNotFound {
            kind,
            name: name.to_owned(),
        })
    });
    let (service, registry, _, _dir) = fixture.build();

    let err = service
        .start(StartRequest::builder().recipe_name("missing").build())
        .await
        .unwrap_err();
    assert!(matches!(err, InferenceException::RecipeNotFound { .. }));
    assert!(registry.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn get_status_follows_the_scheduler() {
    let mut fixture = Fixture::new(test_server());
    run_command(&mut fixture);
    let state = scripted_scheduler(&mut fixture, "12345678");
    let (service, _, _, _dir) = fixture.build();

    let started = service
        .start(StartRequest::builder().recipe_name("test-server").build())
        .await
        .unwrap();
    assert_eq!(started.status, InstanceStatus::Queued);
    assert_eq!(service.get_status(&started.id).await.unwrap().status, InstanceStatus::Queued);

    *state.lock().unwrap() = JobStatus::Unknown;
    assert_eq!(service.get_status(&started.id).await.unwrap().status, InstanceStatus::Queued);

    *state.lock().unwrap() = JobStatus::Running;
    let running = service.get_status("12345678").await.unwrap();
    assert_eq!(running.status, InstanceStatus::Running);
    assert_eq!(running.endpoint("api"), Some("http://mel2091:8000"));

    *state.lock().unwrap() = JobStatus::Stopped;
    let stopped = service.get_status(&started.id).await.unwrap();
    assert_eq!(stopped.status, InstanceStatus::Stopped);

    // terminal records are not re-queried
    *state.lock().unwrap() = JobStatus::Running;
    assert_eq!(service.get_status(&started.id).await.unwrap().status, InstanceStatus::Stopped);
}

#[tokio::test]
async fn stop_cancels_the_job() {
    let mut fixture = Fixture::new(test_server());
    run_command(&mut fixture);
    scripted_scheduler(&mut fixture, "12345678");
    fixture.scheduler.expect_cancel_job().times(1).returning(|_| true);
    let (service, registry, _, _dir) = fixture.build();

    let started = service
        .start(StartRequest::builder().recipe_name("test-server").build())
        .await
        .unwrap();
    assert!(service.stop("12345678", false).await.unwrap());
    assert_eq!(registry.get(&started.id).await.unwrap().status, InstanceStatus::Stopped);
    // already terminal: no second cancel
    assert!(service.stop(&started.id, false).await.unwrap());
}

#[tokio::test]
async fn refused_cancel_fails_unless_forced() {
    let mut fixture = Fixture::new(test_server());
    run_command(&mut fixture);
    scripted_scheduler(&mut fixture, "12345678");
    fixture.scheduler.expect_cancel_job().returning(|_| false);
    let (service, registry, _, _dir) = fixture.build();

    let first = service
        .start(StartRequest::builder().recipe_name("test-server").build())
        .await
        .unwrap();
    let err = service.stop(&first.id, false).await.unwrap_err();
    assert!(matches!(err, InferenceException::Stop { .. }));
    let failed = registry.get(&first.id).await.unwrap();
    assert_eq!(failed.status, InstanceStatus::Error);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("scheduler refused to cancel job 12345678")
    );

    let second = service
        .start(StartRequest::builder().recipe_name("test-server").build())
        .await
        .unwrap();
    assert!(service.stop(&second.id, true).await.unwrap());
    assert_eq!(registry.get(&second.id).await.unwrap().status, InstanceStatus::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn instance_stopped_during_submission_stays_stopped() {
    let mut fixture = Fixture::new(test_server());
    run_command(&mut fixture);
    let registry = fixture.registry.clone();
    fixture.scheduler.expect_submit_job().returning(move |_, _, _| {
        // stopped by another process while sbatch runs
        let registry = registry.clone();
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let id = registry.get_all().await.unwrap()[0].id.clone();
                registry
                    .update_status(&id, InstanceStatus::Stopped, None)
                    .await
                    .unwrap();
            })
        });
        Ok("990".to_owned())
    });
    fixture
        .scheduler
        .expect_cancel_job()
        .withf(|job_id| job_id == "990")
        .times(1)
        .returning(|_| true);
    let (service, registry, _, _dir) = fixture.build();

    let instance = service
        .start(StartRequest::builder().recipe_name("test-server").wait(true).build())
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::Stopped);
    assert_eq!(instance.external_job_id.as_deref(), Some("990"));
    assert!(instance.stopped_at.is_some());
    assert_eq!(registry.get(&instance.id).await.unwrap(), instance);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let fixture = Fixture::new(test_server());
    let (service, _, _, _dir) = fixture.build();
    let err = service.get_status("deadbeef").await.unwrap_err();
    assert!(matches!(err, InferenceException::ServiceNotFound { .. }));
}

async fn running_service(services: &InstanceRegistry, node: &str) -> Instance {
    let mut service = Instance::new(test_server());
    service.status = InstanceStatus::Running;
    service.node = Some(node.to_owned());
    service.endpoints = [("api".to_owned(), format!("http://{node}:8000"))].into();
    services.register(&service).await.unwrap();
    service
}

#[tokio::test]
async fn client_run_targets_a_service_and_completes_with_results() {
    let mut fixture = Fixture::new(benchmark_client(None));
    render_plain(&mut fixture);
    fixture
        .command_builder
        .expect_build_command()
        .returning(|_, environment| {
            assert_eq!(environment["TARGET_ENDPOINT"], "http://mel2091:8000");
            let workload: serde_json::Value =
                serde_json::from_str(&environment["INFERBENCH_WORKLOAD"]).unwrap();
            assert_eq!(workload["concurrency"], 8);
            Ok(format!("python bench.py --out {}", environment["RESULTS_DIR"]))
        });
    let results_dir = fixture.path("results");
    fixture.scheduler.expect_submit_job().returning(move |_, _, _| {
        // the job writes its results into the only run directory there is
        let run_dir = std::fs::read_dir(&results_dir)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        std::fs::write(run_dir.join(RESULTS_FILE), r#"{"throughput": 42.5}"#).unwrap();
        Ok("777".to_owned())
    });
    fixture
        .scheduler
        .expect_query_status()
        .returning(|_| Ok(JobStatus::Stopped));
    let services = fixture.services.clone();
    let target = running_service(&services, "mel2091").await;
    let (service, _, _, _dir) = fixture.build();

    let run = service
        .start(
            StartRequest::builder()
                .recipe_name("load-test")
                .target(target.id.clone())
                .wait(true)
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(run.status, InstanceStatus::Completed);
    assert_eq!(run.target_service_id, Some(target.id));
    assert_eq!(run.target_endpoint.as_deref(), Some("http://mel2091:8000"));

    let results = service.get_results(&run.id).await.unwrap().unwrap();
    assert_eq!(results["throughput"], 42.5);
}

#[tokio::test]
async fn unresolvable_target_is_recorded_without_submitting() {
    let fixture = Fixture::new(benchmark_client(None));
    let (service, registry, _, _dir) = fixture.build();

    let err = service
        .start(
            StartRequest::builder()
                .recipe_name("load-test")
                .target("deadbeef".to_owned())
                .build(),
        )
        .await
        .unwrap_err();
    let InferenceException::Start { instance_id, reason, .. } = err else {
        panic!("expected a start error");
    };
    let instance = registry.get(&instance_id.unwrap()).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Error);
    assert_eq!(instance.error_message, Some(reason));
    assert_eq!(instance.external_job_id, None);
}

#[tokio::test]
async fn client_run_without_results_is_an_error() {
    let mut fixture = Fixture::new(benchmark_client(Some("http://mel2091:8000")));
    run_command(&mut fixture);
    fixture
        .scheduler
        .expect_submit_job()
        .returning(|_, _, _| Ok("778".to_owned()));
    fixture
        .scheduler
        .expect_query_status()
        .returning(|_| Ok(JobStatus::Stopped));
    let (service, registry, _, _dir) = fixture.build();

    let run = service
        .start(StartRequest::builder().recipe_name("load-test").build())
        .await
        .unwrap();
    let reconciled = service.get_status(&run.id).await.unwrap();
    assert_eq!(reconciled.status, InstanceStatus::Error);
    assert_eq!(reconciled.error_message.as_deref(), Some("no results generated"));
    assert_eq!(service.get_results(&run.id).await.unwrap(), None);
    assert_eq!(registry.get(&run.id).await.unwrap(), reconciled);
}

#[tokio::test]
async fn stopping_a_client_run_cancels_it() {
    let mut fixture = Fixture::new(benchmark_client(Some("http://mel2091:8000")));
    run_command(&mut fixture);
    scripted_scheduler(&mut fixture, "779");
    fixture.scheduler.expect_cancel_job().returning(|_| true);
    let (service, registry, _, _dir) = fixture.build();

    let run = service
        .start(StartRequest::builder().recipe_name("load-test").build())
        .await
        .unwrap();
    assert!(service.stop(&run.id, false).await.unwrap());
    assert_eq!(registry.get(&run.id).await.unwrap().status, InstanceStatus::Canceled);
}

#[tokio::test]
async fn monitor_scrapes_running_services() {
    let mut fixture = Fixture::new(monitor());
    render_plain(&mut fixture);
    fixture
        .command_builder
        .expect_build_command()
        .returning(|_, environment| {
            assert_eq!(environment["MONITOR_TARGETS"], "mel2091:8000");
            assert!(Path::new(&environment["MONITOR_TARGETS_FILE"]).exists());
            Ok("prometheus --config.file=prometheus.yml".to_owned())
        });
    scripted_scheduler(&mut fixture, "880");
    let services = fixture.services.clone();
    let scraped = running_service(&services, "mel2091").await;
    services.register(&Instance::new(test_server())).await.unwrap();
    let (service, _, _, _dir) = fixture.build();

    let instance = service
        .start(StartRequest::builder().recipe_name("stack").build())
        .await
        .unwrap();
    assert_eq!(instance.targets, vec![scraped.id]);
    let targets: serde_json::Value = serde_json::from_slice(
        &std::fs::read(Path::new(instance.work_dir.as_deref().unwrap()).join("targets.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(targets[0]["labels"]["service_name"], "test-server");
}

#[tokio::test]
async fn health_check_retries_until_success() {
    let mut fixture = Fixture::new(test_server());
    run_command(&mut fixture);
    let state = scripted_scheduler(&mut fixture, "12345678");
    *state.lock().unwrap() = JobStatus::Running;
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    fixture.health_checker.expect_probe().returning(move |url, _| {
        assert_eq!(url, "http://mel2091:8000/health");
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Ok(503),
            _ => Ok(200),
        }
    });
    let (service, _, _, _dir) = fixture.build();

    let instance = service
        .start(StartRequest::builder().recipe_name("test-server").wait(true).build())
        .await
        .unwrap();
    let report = service.check_health(&instance.id).await.unwrap();
    assert!(report.healthy);
    assert_eq!(report.status_code, Some(200));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn health_of_a_queued_service_is_reported_unhealthy() {
    let mut fixture = Fixture::new(test_server());
    run_command(&mut fixture);
    scripted_scheduler(&mut fixture, "12345678");
    let (service, _, _, _dir) = fixture.build();

    let instance = service
        .start(StartRequest::builder().recipe_name("test-server").build())
        .await
        .unwrap();
    let report = service.check_health(&instance.id).await.unwrap();
    assert!(!report.healthy);
    assert_eq!(report.status, InstanceStatus::Queued);
}

#[tokio::test]
async fn listing_and_cleanup() {
    let mut fixture = Fixture::new(test_server());
    run_command(&mut fixture);
    scripted_scheduler(&mut fixture, "12345678");
    fixture.scheduler.expect_cancel_job().returning(|_| true);
    fixture
        .recipes
        .expect_list()
        .returning(|_| Ok(vec!["test-server".to_owned()]));
    let (service, _, _, _dir) = fixture.build();

    let first = service
        .start(StartRequest::builder().recipe_name("test-server").build())
        .await
        .unwrap();
    let second = service
        .start(StartRequest::builder().recipe_name("test-server").build())
        .await
        .unwrap();
    service.stop(&first.id, false).await.unwrap();

    assert_eq!(service.list_recipes().await.unwrap(), vec!["test-server"]);
    assert_eq!(service.list_instances(false).await.unwrap().len(), 2);
    let active = service.list_instances(true).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.id);

    assert_eq!(service.cleanup(Duration::from_secs(3600)).await.unwrap(), 0);
    assert_eq!(service.list_instances(false).await.unwrap().len(), 2);
}
