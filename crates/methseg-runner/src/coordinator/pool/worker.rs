use super::PoolCounters;
use crate::coordinator::telemetry::{
    increment_workers_cancelled, increment_workers_failed, increment_workers_spawned,
    record_worker_duration,
};
use core::time::Duration;
use methseg_core::{RenderedCommand, TaskState, WorkerOutcome};
use std::{path::PathBuf, process::Stdio, sync::Arc, time::Instant};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// One segmentation subprocess, fully rendered and ready to spawn.
#[derive(Clone, Debug)]
pub struct WorkerTask {
    pub index: usize,
    pub command: RenderedCommand,
    /// Shard the subprocess is expected to write.
    pub output: PathBuf,
    pub timeout: Option<Duration>,
    /// Time between SIGTERM and the hard kill.
    pub kill_grace: Duration,
}

/// Why a running child had to be stopped.
enum Stop {
    Cancelled,
    TimedOut(Duration),
}

/// Runs one worker subprocess to a terminal state.
///
/// The child is spawned in its own process group. It runs until it exits, the
/// `cancel` token fires, or its timeout elapses; in the latter two cases the
/// whole group is terminated (see [`terminate`]). Never returns early: the
/// child has been reaped by the time this resolves.
///
/// # Outcomes
///
/// - [`TaskState::Completed`] - exit status 0.
/// - [`TaskState::Failed`] - non-zero exit, signal, timeout or spawn error.
/// - [`TaskState::Cancelled`] - terminated because `cancel` fired.
#[tracing::instrument(skip_all, fields(worker = task.index))]
pub async fn run_worker(
    task: WorkerTask,
    cancel: CancellationToken,
    counters: Arc<PoolCounters>,
) -> WorkerOutcome {
    let start = Instant::now();

    let mut state = TaskState::Spawned;

    // A shard left by an earlier run must not stand in for this worker's.
    match tokio::fs::remove_file(&task.output).await {
        Ok(()) => {
            tracing::warn!(output = %task.output.display(), "Removed stale shard");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::error!(output = %task.output.display(), "Cannot remove stale shard: {e}");
            counters.transition(state, TaskState::Failed);
            increment_workers_failed();
            return outcome(
                &task,
                start,
                TaskState::Failed,
                None,
                Some(format!("cannot remove stale shard: {e}")),
            );
        }
    }

    let mut command = Command::new(task.command.program());
    command
        .args(task.command.args())
        .stdin(Stdio::null())
        .kill_on_drop(true);
    #[cfg(unix)]
    {
        command.process_group(0);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(command = %task.command, "Failed to start worker: {e}");
            counters.transition(state, TaskState::Failed);
            increment_workers_failed();
            return outcome(
                &task,
                start,
                TaskState::Failed,
                None,
                Some(format!("failed to start: {e}")),
            );
        }
    };

    counters.transition(state, TaskState::Running);
    state = TaskState::Running;
    increment_workers_spawned();
    tracing::debug!(pid = child.id(), command = %task.command, ?state, "Worker running");

    let deadline = async {
        match task.timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => core::future::pending().await,
        }
    };

    let waited = tokio::select! {
        status = child.wait() => Ok(status),
        () = cancel.cancelled() => Err(Stop::Cancelled),
        () = deadline => Err(Stop::TimedOut(task.timeout.unwrap_or_default())),
    };

    let (terminal, exit_code, detail) = match waited {
        Ok(Ok(status)) if status.success() => (TaskState::Completed, status.code(), None),
        Ok(Ok(status)) => (
            TaskState::Failed,
            status.code(),
            Some(format!("exited with {status}")),
        ),
        Ok(Err(e)) => (
            TaskState::Failed,
            None,
            Some(format!("failed to wait for worker: {e}")),
        ),
        Err(Stop::Cancelled) => {
            tracing::debug!("Terminating worker on cancellation");
            let status = terminate(&mut child, task.kill_grace).await;
            (
                TaskState::Cancelled,
                status.and_then(|s| s.code()),
                Some("cancelled".to_string()),
            )
        }
        Err(Stop::TimedOut(limit)) => {
            tracing::warn!(timeout_secs = limit.as_secs(), "Worker timed out");
            let status = terminate(&mut child, task.kill_grace).await;
            (
                TaskState::Failed,
                status.and_then(|s| s.code()),
                Some(format!("timed out after {}s", limit.as_secs())),
            )
        }
    };

    counters.transition(state, terminal);
    let state = terminal;
    match state {
        TaskState::Completed => {
            tracing::info!(elapsed_ms = elapsed_ms(start), "Worker completed");
        }
        TaskState::Cancelled => {
            increment_workers_cancelled();
            tracing::info!("Worker cancelled");
        }
        _ => {
            increment_workers_failed();
            tracing::error!(
                exit_code,
                detail = detail.as_deref().unwrap_or_default(),
                "Worker failed"
            );
        }
    }

    let outcome = outcome(&task, start, state, exit_code, detail);
    record_worker_duration(outcome.elapsed_ms as f64);
    outcome
}

/// Stops `child` and its process group, then reaps it.
///
/// On unix the group receives SIGTERM first; if the child has not exited
/// after `grace`, the group is sent SIGKILL. Elsewhere the child is killed
/// directly.
async fn terminate(child: &mut Child, grace: Duration) -> Option<std::process::ExitStatus> {
    #[cfg(unix)]
    {
        if let Some(pgid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) {
            signal_group(pgid, libc::SIGTERM);
            if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                return status.ok();
            }
            tracing::warn!(grace_secs = grace.as_secs_f64(), "Worker ignored SIGTERM, killing");
            signal_group(pgid, libc::SIGKILL);
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.start_kill() {
        tracing::debug!("Worker already gone: {e}");
    }
    child.wait().await.ok()
}

#[cfg(unix)]
fn signal_group(pgid: libc::pid_t, signal: libc::c_int) {
    // SAFETY: `kill` has no memory-safety preconditions. A negative pid
    // addresses the process group created for this child at spawn.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc != 0 {
        tracing::debug!(
            pgid,
            signal,
            "Signalling process group failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

fn outcome(
    task: &WorkerTask,
    start: Instant,
    state: TaskState,
    exit_code: Option<i32>,
    detail: Option<String>,
) -> WorkerOutcome {
    WorkerOutcome {
        index: task.index,
        state,
        exit_code,
        detail,
        elapsed_ms: elapsed_ms(start),
        output: task.output.clone(),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
