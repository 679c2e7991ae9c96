//! One segmentation job from chunk query to merged output.
//!
//! ```text
//! query chunk count -> plan partition -> spawn workers -> wait -> merge
//! ```
//!
//! Each step either advances the [`JobReport`] or stops the job with the
//! error of its stage. Nothing is spawned unless the query and the plan
//! succeed, and nothing is merged unless every worker completed.

use super::{
    config::RunnerConfig,
    pool::{WorkerPool, WorkerTask},
    query::{QueryOutcome, query_chunk_count},
    report::JobReport,
    telemetry::increment_merged_bytes,
};
use methseg_core::{
    Error, PartitionPlan, Result, TaskState, TemplateVars, WorkerOutcome, merge_shards,
    remove_shards,
};
use tokio_util::sync::CancellationToken;

pub struct Job {
    config: RunnerConfig,
    shutdown: CancellationToken,
}

impl Job {
    /// `shutdown` is cancelled on interrupt; the job then terminates its
    /// workers and fails with [`Error::Cancelled`].
    pub fn new(config: RunnerConfig, shutdown: CancellationToken) -> Self {
        Self { config, shutdown }
    }

    /// Runs the job, recording progress in `report`.
    #[tracing::instrument(skip_all, fields(chromosome = self.config.job.chromosome(), workers = self.config.job.workers()))]
    pub async fn run(&self, report: &mut JobReport) -> Result<()> {
        let job = &self.config.job;

        let total_chunks =
            match query_chunk_count(job, &self.config.list_command, &self.shutdown).await? {
                QueryOutcome::Chunks(n) => n,
                QueryOutcome::Cancelled => return Err(self.cancelled(&[])),
            };
        report.total_chunks = Some(total_chunks);

        let plan = self.plan(total_chunks)?;
        report.plan = Some(plan);

        let tasks = self.tasks(&plan)?;

        if self.config.dry_run {
            for task in &tasks {
                tracing::info!(
                    worker = task.index,
                    output = %task.output.display(),
                    command = %task.command,
                    "Dry run"
                );
            }
            return Ok(());
        }

        if self.shutdown.is_cancelled() {
            return Err(self.cancelled(&[]));
        }

        let pool = WorkerPool::spawn(tasks, &self.shutdown, self.config.failure_policy);
        let counters = pool.counters();
        tracing::debug!(tasks = pool.len(), "Waiting for workers");
        let outcomes = pool.join_all().await;
        report.counters = Some(counters.snapshot());
        report.workers = outcomes;

        if self.shutdown.is_cancelled() {
            return Err(self.cancelled(&report.workers));
        }

        let failed = failed_workers(&report.workers);
        if !failed.is_empty() {
            return Err(Error::WorkerFailure {
                failed,
                total: job.workers(),
            });
        }

        let layout = job.layout();
        let stats = merge_shards(&layout, job.workers()).await?;
        increment_merged_bytes(stats.bytes);
        tracing::info!(
            path = %stats.path.display(),
            bytes = stats.bytes,
            shards = stats.shards,
            "Merged shards"
        );
        report.merged = Some(stats);

        if self.config.remove_shards {
            if let Err(e) = remove_shards(&layout, job.workers()).await {
                tracing::warn!("Failed to remove shards: {e}");
            }
        }

        Ok(())
    }

    fn plan(&self, total_chunks: u64) -> Result<PartitionPlan> {
        let job = &self.config.job;
        let plan = PartitionPlan::new(total_chunks, job.chunk_size(), job.workers())?;

        tracing::info!(
            total_chunks,
            adjusted_chunk_size = plan.adjusted_chunk_size(),
            "Planned partition"
        );

        if !plan.is_exact() {
            let reason = format!(
                "{} of the span of {} is not assigned to any worker ({} workers x {})",
                plan.uncovered_span(),
                plan.total_span(),
                plan.workers(),
                plan.adjusted_chunk_size()
            );
            if self.config.strict_partition {
                return Err(Error::InvalidPartition { reason });
            }
            tracing::warn!("{reason}");
        }

        Ok(plan)
    }

    fn tasks(&self, plan: &PartitionPlan) -> Result<Vec<WorkerTask>> {
        let job = &self.config.job;
        let layout = job.layout();

        (0..plan.workers())
            .map(|index| {
                let output = layout.shard_path(index);
                let mut command = self.config.segment_command.render(&TemplateVars {
                    input: Some(job.input()),
                    output: Some(output.as_path()),
                    chromosome: Some(job.chromosome()),
                    chunk_size: Some(plan.adjusted_chunk_size()),
                    chunk: Some(index),
                    read_group: Some(job.read_group()),
                })?;
                command.extend_args(&self.config.worker_args);

                Ok(WorkerTask {
                    index,
                    command,
                    output,
                    timeout: self.config.task_timeout,
                    kill_grace: self.config.kill_grace,
                })
            })
            .collect()
    }

    fn cancelled(&self, outcomes: &[WorkerOutcome]) -> Error {
        Error::Cancelled {
            completed: outcomes.iter().filter(|o| o.is_completed()).count(),
            total: self.config.job.workers(),
        }
    }
}

/// Workers to blame for an unsuccessful pool: those that failed, or, if a
/// fail-fast cancellation left none marked failed, every unfinished one.
fn failed_workers(outcomes: &[WorkerOutcome]) -> Vec<usize> {
    let failed: Vec<usize> = outcomes
        .iter()
        .filter(|o| o.state == TaskState::Failed)
        .map(|o| o.index)
        .collect();
    if !failed.is_empty() {
        return failed;
    }
    outcomes
        .iter()
        .filter(|o| !o.is_completed())
        .map(|o| o.index)
        .collect()
}
