use std::path::Path;

use crate::exception::InferenceResult;
use crate::model::vo::{JobStatus, LogStream, ScriptInfo};

#[async_trait::async_trait]
pub trait JobSchedulerService: Send + Sync {
    /// Render a batch script. No side effects.
    fn render_script(&self, script_info: &ScriptInfo) -> String;
    /// Write `script` as `work_dir/script_name`, submit it, return the job id.
    async fn submit_job(
        &self,
        script: &str,
        work_dir: &Path,
        script_name: &str,
    ) -> InferenceResult<String>;
    /// `false` when the scheduler refused; jobs already gone count as cancelled.
    async fn cancel_job(&self, job_id: &str) -> bool;
    /// Normalized job state. `Err` only when the scheduler could not be asked.
    async fn query_status(&self, job_id: &str) -> InferenceResult<JobStatus>;
    async fn query_node(&self, job_id: &str) -> InferenceResult<Option<String>>;
    /// Last `lines` lines of the job's output or error file.
    async fn read_output(
        &self,
        job_id: &str,
        work_dir: &Path,
        stream: LogStream,
        lines: usize,
    ) -> InferenceResult<String>;
}
