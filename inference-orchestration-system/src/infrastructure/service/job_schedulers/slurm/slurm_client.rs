use std::path::{Path, PathBuf};
use std::sync::Arc;

use domain_inference::{
    exception::{InferenceException, InferenceResult},
    model::vo::{JobStatus, LogStream, ScriptInfo},
    service::JobSchedulerService,
};
use indoc::formatdoc;
use infrastructure_command::{CommandOutput, CommandRunner, CommandSpec};
use typed_builder::TypedBuilder;

use super::models::{self, SlurmJob};
use crate::infrastructure::service::shell::double_quoted;

/// Scheduler access through the Slurm command line tools.
#[derive(TypedBuilder)]
pub struct SlurmClient {
    runner: Arc<dyn CommandRunner>,
    #[builder(default, setter(into))]
    account: Option<String>,
    #[builder(default, setter(into))]
    qos: Option<String>,
    /// Environment modules loaded before the payload.
    #[builder(default)]
    modules: Vec<String>,
}

#[async_trait::async_trait]
impl JobSchedulerService for SlurmClient {
    fn render_script(&self, script_info: &ScriptInfo) -> String {
        let job_name = &script_info.job_name;
        let resources = &script_info.resources;
        let output_dir = script_info.output_dir.display();

        let mut directives = vec![
            format!("#SBATCH --job-name={job_name}"),
            format!("#SBATCH --time={}", resources.time()),
            format!("#SBATCH --partition={}", resources.partition()),
            format!("#SBATCH --nodes={}", resources.nodes()),
            format!("#SBATCH --cpus-per-task={}", resources.cpus_per_task()),
            format!("#SBATCH --mem={}", resources.memory()),
            format!("#SBATCH --output={output_dir}/{job_name}_%j.out"),
            format!("#SBATCH --error={output_dir}/{job_name}_%j.err"),
        ];
        if let Some(gres) = resources.gres() {
            directives.push(format!("#SBATCH --gres={gres}"));
        }
        if let Some(account) = &self.account {
            directives.push(format!("#SBATCH --account={account}"));
        }
        if let Some(qos) = &self.qos {
            directives.push(format!("#SBATCH --qos={qos}"));
        }
        let directives = directives.join("\n");

        let mut body = Vec::new();
        body.extend(self.modules.iter().map(|m| format!("module load {m}")));
        body.extend(
            script_info
                .environment
                .iter()
                .map(|(k, v)| format!("export {k}={}", double_quoted(v))),
        );
        body.extend(script_info.setup_commands.iter().cloned());
        let body = body.join("\n");
        let command = &script_info.command;

        formatdoc! {r#"
            #!/bin/bash
            {directives}

            echo "Job $SLURM_JOB_ID ({job_name}) on $SLURM_NODELIST"
            echo "Started at $(date)"
            {body}
            {command}
            ec=$?
            echo "INFERBENCH_JOB_END exit_code=$ec"
            exit $ec
        "#}
    }

    async fn submit_job(
        &self,
        script: &str,
        work_dir: &Path,
        script_name: &str,
    ) -> InferenceResult<String> {
        let error = |reason: String| InferenceException::orchestrator("submit", reason, None);
        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(|e| error(format!("cannot create {}: {e}", work_dir.display())))?;
        let path = work_dir.join(script_name);
        tokio::fs::write(&path, script)
            .await
            .map_err(|e| error(format!("cannot write {}: {e}", path.display())))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| error(format!("cannot chmod {}: {e}", path.display())))?;
        }

        let spec = CommandSpec::new("sbatch").arg(script_name).current_dir(work_dir);
        let out = self.runner.run(&spec).await.map_err(|e| error(e.to_string()))?;
        if !out.success() {
            return Err(error(failure_reason(&out)));
        }
        let job_id = models::parse_job_id(&out.stdout).ok_or_else(|| {
            error(format!(
                "unexpected sbatch output `{}`",
                out.stdout.trim()
            ))
        })?;
        tracing::debug!("Submitted {} as job {job_id}", path.display());
        Ok(job_id)
    }

    async fn cancel_job(&self, job_id: &str) -> bool {
        let out = match self.runner.run(&CommandSpec::new("scancel").arg(job_id)).await {
            Ok(out) => out,
            Err(e) => {
                tracing::error!("Failed to cancel job {job_id}: {e}");
                return false;
            }
        };
        if out.success() {
            return true;
        }
        let stderr = out.stderr.to_lowercase();
        if stderr.contains("invalid job id") || stderr.contains("already completing") {
            tracing::debug!("Job {job_id} already gone: {}", out.stderr.trim());
            return true;
        }
        tracing::error!("Failed to cancel job {job_id}: {}", failure_reason(&out));
        false
    }

    async fn query_status(&self, job_id: &str) -> InferenceResult<JobStatus> {
        let Some(job) = self.find_job(job_id).await? else {
            tracing::debug!("Job {job_id} is unknown to squeue and sacct");
            return Ok(JobStatus::Unknown);
        };
        Ok(job.status().unwrap_or_else(|| {
            tracing::warn!("Job {job_id} reported unrecognized state `{}`", job.state);
            JobStatus::Unknown
        }))
    }

    async fn query_node(&self, job_id: &str) -> InferenceResult<Option<String>> {
        Ok(self
            .find_job(job_id)
            .await?
            .and_then(|job| job.node().map(ToOwned::to_owned)))
    }

    async fn read_output(
        &self,
        job_id: &str,
        work_dir: &Path,
        stream: LogStream,
        lines: usize,
    ) -> InferenceResult<String> {
        let Some(path) = find_output_file(job_id, work_dir, stream).await else {
            tracing::debug!("No {stream} file for job {job_id} in {}", work_dir.display());
            return Ok(String::new());
        };
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            InferenceException::orchestrator(
                "logs",
                format!("cannot read {}: {e}", path.display()),
                Some(job_id),
            )
        })?;
        Ok(tail(&content, lines))
    }
}

impl SlurmClient {
    /// Active queue first, accounting history once the job has left it.
    async fn find_job(&self, job_id: &str) -> InferenceResult<Option<SlurmJob>> {
        let squeue = CommandSpec::new("squeue")
            .args(["--job", job_id, "--noheader", models::SQUEUE_FORMAT]);
        let out = self.query(&squeue, job_id).await?;
        if out.success() {
            if let Some(job) = Self::matching(&out.stdout, job_id) {
                return Ok(Some(job));
            }
        }

        let sacct = CommandSpec::new("sacct").args([
            "--job",
            job_id,
            "--noheader",
            "--parsable2",
            models::SACCT_FORMAT,
        ]);
        let out = self.query(&sacct, job_id).await?;
        if !out.success() {
            tracing::debug!("sacct failed for job {job_id}: {}", failure_reason(&out));
            return Ok(None);
        }
        Ok(Self::matching(&out.stdout, job_id))
    }

    async fn query(&self, spec: &CommandSpec, job_id: &str) -> InferenceResult<CommandOutput> {
        self.runner
            .run(spec)
            .await
            .map_err(|e| InferenceException::orchestrator("query", e, Some(job_id)))
    }

    /// Only the row of `job_id` itself; other rows (array tasks, unrelated
    /// jobs) say nothing about it.
    fn matching(stdout: &str, job_id: &str) -> Option<SlurmJob> {
        models::parse_jobs(stdout)
            .into_iter()
            .find(|job| job.job_id == job_id)
    }
}

fn failure_reason(out: &CommandOutput) -> String {
    let stderr = out.stderr.trim();
    let code = out
        .code
        .map_or_else(|| "signal".to_owned(), |code| code.to_string());
    if stderr.is_empty() {
        format!("exit status {code}")
    } else {
        format!("exit status {code}: {stderr}")
    }
}

async fn find_output_file(job_id: &str, work_dir: &Path, stream: LogStream) -> Option<PathBuf> {
    let suffix = format!("_{job_id}.{}", stream.extension());
    let mut entries = tokio::fs::read_dir(work_dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().ends_with(&suffix) {
            return Some(entry.path());
        }
    }
    None
}

fn tail(content: &str, lines: usize) -> String {
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    let mut tail = all[start..].join("\n");
    if !tail.is_empty() && content.ends_with('\n') {
        tail.push('\n');
    }
    tail
}
