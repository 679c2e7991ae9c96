//! Launches and supervises the segmentation workers of one job.
//!
//! [`WorkerPool::spawn`] starts every [`WorkerTask`] at once on the tokio
//! runtime and [`WorkerPool::join_all`] waits for all of them. Cancellation is
//! layered: the job's shutdown token (interrupts) has a child token owned by
//! the pool, which fail-fast cancels on the first failure. Workers only watch
//! the child token, so both reach them, while the shutdown token still tells
//! an interrupt apart from a sibling failure.

use super::{PoolCounters, WorkerTask, worker::run_worker};
use crate::coordinator::config::FailurePolicy;
use core::time::Duration;
use futures::future::join_all;
use methseg_core::{TaskState, WorkerOutcome};
use std::{path::PathBuf, sync::Arc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often the pool logs its counters while waiting.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

struct Tracked {
    index: usize,
    output: PathBuf,
    handle: JoinHandle<WorkerOutcome>,
}

/// A set of running worker tasks.
pub struct WorkerPool {
    tracked: Vec<Tracked>,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    /// Spawns one tokio task per worker.
    ///
    /// Workers are terminated when `shutdown` is cancelled, and additionally
    /// when any worker fails if `policy` is [`FailurePolicy::FailFast`].
    pub fn spawn(
        tasks: Vec<WorkerTask>,
        shutdown: &CancellationToken,
        policy: FailurePolicy,
    ) -> Self {
        let counters = Arc::new(PoolCounters::default());
        let abort = shutdown.child_token();

        let tracked = tasks
            .into_iter()
            .map(|task| {
                let index = task.index;
                let output = task.output.clone();
                let abort = abort.clone();
                let counters = counters.clone();

                let handle = tokio::spawn(async move {
                    let outcome = run_worker(task, abort.clone(), counters).await;
                    if policy == FailurePolicy::FailFast
                        && outcome.state == TaskState::Failed
                        && !abort.is_cancelled()
                    {
                        tracing::warn!(
                            worker = outcome.index,
                            "Worker failed, cancelling remaining workers"
                        );
                        abort.cancel();
                    }
                    outcome
                });

                Tracked {
                    index,
                    output,
                    handle,
                }
            })
            .collect::<Vec<_>>();

        tracing::info!(workers = tracked.len(), ?policy, "Spawned workers");

        Self { tracked, counters }
    }

    /// Number of tracked tasks.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn counters(&self) -> Arc<PoolCounters> {
        self.counters.clone()
    }

    /// Waits for every task to reach a terminal state.
    ///
    /// Outcomes are returned in worker order. A task that panicked is
    /// reported as [`TaskState::Failed`].
    pub async fn join_all(self) -> Vec<WorkerOutcome> {
        let Self { tracked, counters } = self;

        let (meta, handles): (Vec<_>, Vec<_>) = tracked
            .into_iter()
            .map(|t| ((t.index, t.output), t.handle))
            .unzip();

        let joined = join_all(handles);
        tokio::pin!(joined);

        let mut progress = tokio::time::interval(PROGRESS_INTERVAL);
        progress.tick().await;

        let results = loop {
            tokio::select! {
                results = &mut joined => break results,
                _ = progress.tick() => {
                    let snapshot = counters.snapshot();
                    tracing::info!(
                        running = snapshot.running,
                        completed = snapshot.completed,
                        failed = snapshot.failed,
                        cancelled = snapshot.cancelled,
                        "Waiting for workers"
                    );
                }
            }
        };

        meta.into_iter()
            .zip(results)
            .map(|((index, output), result)| match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(worker = index, "Worker task aborted: {e}");
                    WorkerOutcome {
                        index,
                        state: TaskState::Failed,
                        exit_code: None,
                        detail: Some(format!("worker task aborted: {e}")),
                        elapsed_ms: 0,
                        output,
                    }
                }
            })
            .collect()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use methseg_core::RenderedCommand;
    use std::{collections::HashSet, ffi::OsString, path::Path, time::Instant};

    /// `script` runs with `$0` set to the worker index and `$1` to its output.
    fn tasks(dir: &Path, workers: usize, script: &str) -> Vec<WorkerTask> {
        (0..workers)
            .map(|index| {
                let output = dir.join(format!("out_chr1_{index}.tsv"));
                WorkerTask {
                    index,
                    command: RenderedCommand {
                        program: OsString::from("sh"),
                        args: vec![
                            OsString::from("-c"),
                            OsString::from(script),
                            OsString::from(index.to_string()),
                            output.clone().into_os_string(),
                        ],
                    },
                    output,
                    timeout: None,
                    kill_grace: Duration::from_millis(500),
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn tracks_one_task_per_worker() {
        let dir = tempfile::tempdir().unwrap();
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::spawn(
            tasks(dir.path(), 4, "echo \"$0\" > \"$1\""),
            &shutdown,
            FailurePolicy::Finish,
        );
        assert_eq!(pool.len(), 4);

        let outcomes = pool.join_all().await;
        assert_eq!(outcomes.len(), 4);
        let outputs: HashSet<_> = outcomes.iter().map(|o| o.output.clone()).collect();
        assert_eq!(outputs.len(), 4);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.index, i);
            assert!(outcome.is_completed(), "{outcome:?}");
            let written = std::fs::read_to_string(&outcome.output).unwrap();
            assert_eq!(written, format!("{i}\n"));
        }
    }

    #[tokio::test]
    async fn finish_policy_lets_others_complete() {
        let dir = tempfile::tempdir().unwrap();
        let script = "if [ \"$0\" = 1 ]; then exit 3; fi; sleep 0.3; echo ok > \"$1\"";
        let pool = WorkerPool::spawn(
            tasks(dir.path(), 3, script),
            &CancellationToken::new(),
            FailurePolicy::Finish,
        );

        let states: Vec<_> = pool.join_all().await.into_iter().map(|o| o.state).collect();
        assert_eq!(
            states,
            vec![TaskState::Completed, TaskState::Failed, TaskState::Completed]
        );
    }

    #[tokio::test]
    async fn fail_fast_cancels_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let script = "if [ \"$0\" = 0 ]; then exit 1; fi; sleep 30";
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::spawn(
            tasks(dir.path(), 3, script),
            &shutdown,
            FailurePolicy::FailFast,
        );

        let start = Instant::now();
        let outcomes = pool.join_all().await;
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(outcomes[0].state, TaskState::Failed);
        assert_eq!(outcomes[1].state, TaskState::Cancelled);
        assert_eq!(outcomes[2].state, TaskState::Cancelled);
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_after_some_complete_keeps_their_shards() {
        let dir = tempfile::tempdir().unwrap();
        // Workers 0 and 1 finish right away, the rest block.
        let script = "echo \"$0\" > \"$1\"; if [ \"$0\" -ge 2 ]; then sleep 30; fi";
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::spawn(
            tasks(dir.path(), 4, script),
            &shutdown,
            FailurePolicy::Finish,
        );
        let counters = pool.counters();

        let deadline = Instant::now() + Duration::from_secs(10);
        while counters.snapshot().completed < 2 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        shutdown.cancel();

        let start = Instant::now();
        let outcomes = pool.join_all().await;
        assert!(start.elapsed() < Duration::from_secs(5));

        let states: Vec<_> = outcomes.iter().map(|o| o.state).collect();
        assert_eq!(
            states,
            vec![
                TaskState::Completed,
                TaskState::Completed,
                TaskState::Cancelled,
                TaskState::Cancelled
            ]
        );
        assert!(outcomes[0].output.exists());
        assert!(outcomes[1].output.exists());
        assert_eq!(counters.snapshot().running, 0);
    }
}
