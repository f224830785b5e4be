use std::str::FromStr;

use domain_inference::model::vo::JobStatus;
use once_cell::sync::Lazy;
use regex::Regex;

static JOB_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)(\d+)\s*$").expect("valid job id pattern"));

/// `squeue --format` matching the field order of [`SlurmJob`].
pub const SQUEUE_FORMAT: &str = "--format=%i|%j|%T|%N|%P|%M|%r";
/// `sacct --format` matching the field order of [`SlurmJob`].
pub const SACCT_FORMAT: &str = "--format=JobID,JobName,State,NodeList,Partition,Elapsed";

/// One pipe-delimited row of `squeue` or `sacct` output.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct SlurmJob {
    pub job_id: String,
    pub job_name: String,
    pub state: String,
    pub node_list: String,
    pub partition: String,
    pub elapsed: String,
    /// Pending reason, only reported by `squeue`.
    pub reason: Option<String>,
}

impl FromStr for SlurmJob {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split('|').map(str::trim).collect();
        if fields.len() < 3 || fields[0].is_empty() {
            return Err(format!("malformed scheduler row `{s}`"));
        }
        let field = |i: usize| fields.get(i).copied().unwrap_or_default().to_owned();
        Ok(Self {
            job_id: field(0),
            job_name: field(1),
            state: field(2),
            node_list: field(3),
            partition: field(4),
            elapsed: field(5),
            reason: fields.get(6).filter(|r| !r.is_empty()).map(|r| r.to_string()),
        })
    }
}

impl SlurmJob {
    /// Job steps (`123.batch`, `123.0`) are reported by `sacct` next to the
    /// allocation itself.
    pub fn is_step(&self) -> bool {
        self.job_id.contains('.')
    }

    /// `None` while the job has no allocation yet.
    pub fn node(&self) -> Option<&str> {
        match self.node_list.as_str() {
            "" | "(null)" | "None assigned" => None,
            node => Some(node),
        }
    }

    pub fn status(&self) -> Option<JobStatus> {
        map_state(&self.state)
    }
}

/// Rows of a status query, job steps dropped.
pub fn parse_jobs(stdout: &str) -> Vec<SlurmJob> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match line.parse::<SlurmJob>() {
            Ok(job) => Some(job),
            Err(e) => {
                tracing::debug!("{e}");
                None
            }
        })
        .filter(|job| !job.is_step())
        .collect()
}

/// Normalize a scheduler state token. `None` for tokens outside the table.
///
/// Accepts long and short forms in any case; `sacct` decorations such as
/// `CANCELLED by 1234` or `FAILED+` are stripped first.
pub fn map_state(token: &str) -> Option<JobStatus> {
    let token = token.split_whitespace().next()?.trim_end_matches('+');
    let status = match token.to_uppercase().as_str() {
        "RUNNING" | "R" => JobStatus::Running,
        "PENDING" | "PD" | "CONFIGURING" | "CF" | "REQUEUED" | "RQ" | "RESIZING" | "RS" => {
            JobStatus::Pending
        }
        "COMPLETING" | "CG" | "STAGE_OUT" | "SO" => JobStatus::Stopping,
        "COMPLETED" | "CD" => JobStatus::Stopped,
        "FAILED" | "F" | "TIMEOUT" | "TO" | "CANCELLED" | "CA" | "NODE_FAIL" | "NF"
        | "OUT_OF_MEMORY" | "OOM" | "BOOT_FAIL" | "BF" | "DEADLINE" | "DL" | "PREEMPTED"
        | "PR" => JobStatus::Error,
        _ => return None,
    };
    Some(status)
}

/// Job id from `sbatch` output: the trailing all-digit token.
pub fn parse_job_id(stdout: &str) -> Option<String> {
    JOB_ID_PATTERN
        .captures(stdout.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
}
