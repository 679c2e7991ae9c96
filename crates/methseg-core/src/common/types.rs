//! # Job and worker types
//!
//! Shared value types passed through every stage of a segmentation job.
//!
//! - [`JobSpec`] - immutable job parameters, validated once at construction
//! - [`TaskState`] - lifecycle of one worker subprocess
//! - [`WorkerOutcome`] - terminal record of one worker
//!
//! ## Constants
//!
//! - [`DEFAULT_CHUNK_SIZE`] - chunk size handed to the chunk lister
//! - [`DEFAULT_READ_GROUP`] - read-group key passed to the segmenter

use crate::{Error, Result, ShardLayout};
use std::path::{Path, PathBuf};

/// Chunk size used when querying the input store, in records per chunk.
pub const DEFAULT_CHUNK_SIZE: u64 = 200_000;

/// Read-group key the segmenter groups reads by.
pub const DEFAULT_READ_GROUP: &str = "haplotype";

/// Immutable description of one segmentation job.
///
/// Constructed once from caller-supplied parameters and then only read.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct JobSpec {
    input: PathBuf,
    output_prefix: String,
    chromosome: String,
    workers: usize,
    chunk_size: u64,
    read_group: String,
}

impl JobSpec {
    /// Validates and builds a job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJob`] if the chromosome or output prefix is
    /// empty, or if `workers` or `chunk_size` is zero.
    pub fn new(
        input: impl Into<PathBuf>,
        output_prefix: impl Into<String>,
        chromosome: impl Into<String>,
        workers: usize,
        chunk_size: u64,
        read_group: impl Into<String>,
    ) -> Result<Self> {
        let spec = Self {
            input: input.into(),
            output_prefix: output_prefix.into(),
            chromosome: chromosome.into(),
            workers,
            chunk_size,
            read_group: read_group.into(),
        };

        if spec.chromosome.trim().is_empty() {
            return Err(invalid("chromosome must not be empty"));
        }
        if spec.output_prefix.is_empty() {
            return Err(invalid("output prefix must not be empty"));
        }
        if spec.workers == 0 {
            return Err(invalid("worker count must be greater than 0"));
        }
        if spec.chunk_size == 0 {
            return Err(invalid("chunk size must be greater than 0"));
        }

        Ok(spec)
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output_prefix(&self) -> &str {
        &self.output_prefix
    }

    pub fn chromosome(&self) -> &str {
        &self.chromosome
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn read_group(&self) -> &str {
        &self.read_group
    }

    /// Shard and merged-output naming for this job.
    pub fn layout(&self) -> ShardLayout {
        ShardLayout::new(&self.output_prefix, &self.chromosome)
    }
}

fn invalid(reason: &str) -> Error {
    Error::InvalidJob {
        reason: reason.to_string(),
    }
}

/// Lifecycle of one worker subprocess.
///
/// `Spawned -> Running -> Completed`, or `Spawned -> Running -> Cancelled`.
/// A worker that exits unsuccessfully, times out, or cannot be started ends
/// as `Failed`. Terminal states are never left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TaskState {
    Spawned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Terminal record of one worker.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct WorkerOutcome {
    pub index: usize,
    pub state: TaskState,
    /// Exit code of the subprocess, if it exited normally.
    pub exit_code: Option<i32>,
    /// Human-readable reason for a non-completed state.
    pub detail: Option<String>,
    pub elapsed_ms: u64,
    pub output: PathBuf,
}

impl WorkerOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == TaskState::Completed
    }
}
