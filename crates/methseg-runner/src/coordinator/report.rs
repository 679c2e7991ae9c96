//! JSON summary of one job run.

use super::{config::FailurePolicy, pool::CounterSnapshot};
use anyhow::Context;
use methseg_core::{Error, JobSpec, MergeStats, PartitionPlan, WorkerOutcome};
use serde::Serialize;
use std::path::Path;

/// Everything known about a job once it stops, successful or not.
#[derive(Debug, Serialize)]
pub struct JobReport {
    pub job: JobSpec,
    pub failure_policy: FailurePolicy,
    pub dry_run: bool,
    /// Chunk count returned by the lister.
    pub total_chunks: Option<u64>,
    pub plan: Option<PartitionPlan>,
    pub workers: Vec<WorkerOutcome>,
    pub counters: Option<CounterSnapshot>,
    pub merged: Option<MergeStats>,
    pub elapsed_ms: u64,
    pub failure: Option<Failure>,
}

#[derive(Debug, Serialize)]
pub struct Failure {
    pub stage: String,
    pub message: String,
    pub exit_code: u8,
}

impl From<&Error> for Failure {
    fn from(err: &Error) -> Self {
        Self {
            stage: err.stage().to_string(),
            message: err.to_string(),
            exit_code: err.exit_code(),
        }
    }
}

impl JobReport {
    pub fn new(job: JobSpec, failure_policy: FailurePolicy, dry_run: bool) -> Self {
        Self {
            job,
            failure_policy,
            dry_run,
            total_chunks: None,
            plan: None,
            workers: Vec::new(),
            counters: None,
            merged: None,
            elapsed_ms: 0,
            failure: None,
        }
    }

    /// Serializes the report as pretty JSON to `path`.
    pub async fn write(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize job summary")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write job summary to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use methseg_core::TaskState;
    use std::path::PathBuf;

    #[tokio::test]
    async fn writes_failure_and_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let job = JobSpec::new("sample.m5", "out", "chr20", 2, 100, "haplotype").unwrap();
        let mut report = JobReport::new(job, FailurePolicy::Finish, false);
        report.total_chunks = Some(10);
        report.plan = Some(PartitionPlan::new(10, 100, 2).unwrap());
        report.workers.push(WorkerOutcome {
            index: 1,
            state: TaskState::Failed,
            exit_code: Some(2),
            detail: Some("exited with exit status: 2".into()),
            elapsed_ms: 12,
            output: PathBuf::from("out_chr20_1.tsv"),
        });
        report.failure = Some(Failure::from(&Error::WorkerFailure {
            failed: vec![1],
            total: 2,
        }));

        let path = dir.path().join("summary.json");
        report.write(&path).await.unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["job"]["chromosome"], "chr20");
        assert_eq!(value["failure_policy"], "finish");
        assert_eq!(value["plan"]["adjusted_chunk_size"], 500);
        assert_eq!(value["workers"][0]["state"], "failed");
        assert_eq!(value["failure"]["stage"], "worker 1");
        assert_eq!(value["failure"]["exit_code"], 5);
        assert!(value["merged"].is_null());
    }

    #[tokio::test]
    async fn unwritable_path_is_an_error() {
        let job = JobSpec::new("a.m5", "out", "chr1", 1, 1, "hp").unwrap();
        let report = JobReport::new(job, FailurePolicy::FailFast, true);
        let err = report
            .write(Path::new("/nonexistent/dir/summary.json"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("summary"), "{err}");
    }
}
