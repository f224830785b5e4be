use std::{collections::BTreeMap, path::Path, path::PathBuf, time::Duration};

use async_trait::async_trait;
use mockall::mock;

use crate::{
    exception::InferenceResult,
    model::vo::{JobStatus, LogStream, Recipe, RecipeKind, ScriptInfo},
    repository::RecipeRepo,
    service::{CommandBuilderService, HealthCheckService, JobSchedulerService},
};

mock! {
    pub RecipeRepo {}
    #[async_trait]
    impl RecipeRepo for RecipeRepo {
        async fn load(&self, kind: RecipeKind, name: &str) -> InferenceResult<Recipe>;
        async fn list(&self, kind: RecipeKind) -> InferenceResult<Vec<String>>;
        async fn save(&self, recipe: &Recipe) -> InferenceResult<PathBuf>;
        async fn reload(&self) -> InferenceResult<usize>;
        fn clear_cache(&self);
    }
}

mock! {
    pub JobSchedulerService {}
    #[async_trait]
    impl JobSchedulerService for JobSchedulerService {
        fn render_script(&self, script_info: &ScriptInfo) -> String;
        async fn submit_job(
            &self,
            script: &str,
            work_dir: &Path,
            script_name: &str,
        ) -> InferenceResult<String>;
        async fn cancel_job(&self, job_id: &str) -> bool;
        async fn query_status(&self, job_id: &str) -> InferenceResult<JobStatus>;
        async fn query_node(&self, job_id: &str) -> InferenceResult<Option<String>>;
        async fn read_output(
            &self,
            job_id: &str,
            work_dir: &Path,
            stream: LogStream,
            lines: usize,
        ) -> InferenceResult<String>;
    }
}

mock! {
    pub CommandBuilderService {}
    impl CommandBuilderService for CommandBuilderService {
        fn build_command(
            &self,
            recipe: &Recipe,
            environment: &BTreeMap<String, String>,
        ) -> InferenceResult<String>;
    }
}

mock! {
    pub HealthCheckService {}
    #[async_trait]
    impl HealthCheckService for HealthCheckService {
        async fn probe(&self, url: &str, timeout: Duration) -> InferenceResult<u16>;
    }
}
