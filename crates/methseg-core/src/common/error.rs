//! Error types for the segmentation coordinator.
//!
//! This module defines the central `Error` enum, which captures every way a
//! segmentation job can fail before, during or after its workers run. Each
//! variant belongs to exactly one [`Stage`] of the job so diagnostics can say
//! where the job stopped, and each stage maps to a distinct process exit code.
//!
//! ## Error Cases
//! - `InvalidJob` / `InvalidTemplate`: the caller-supplied configuration was
//!   rejected before anything ran.
//! - `ResourceQuery` / `ChromosomeNotFound`: the chunk count could not be
//!   determined. Fatal before any worker is spawned.
//! - `InvalidPartition`: the chunk span cannot be split across the requested
//!   workers. Fatal before any worker is spawned.
//! - `WorkerFailure`: one or more workers exited with an error.
//! - `Cancelled`: an interrupt stopped the job; partial shards are kept.
//! - `MissingShard` / `Merge`: the merge step could not read a shard.

use core::fmt;
use std::path::PathBuf;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for a segmentation job.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The job parameters were rejected.
    #[error("Invalid job: {reason}")]
    InvalidJob { reason: String },

    /// A command template could not be parsed or rendered.
    #[error("Invalid command template: {reason}")]
    InvalidTemplate { reason: String },

    /// The chunk lister could not be run or returned unusable output.
    #[error("Chunk query failed: {reason}")]
    ResourceQuery { reason: String },

    /// The chunk listing has no row for the requested chromosome.
    #[error("Chromosome `{chromosome}` not found in chunk listing of {}", .input.display())]
    ChromosomeNotFound { chromosome: String, input: PathBuf },

    /// The chunk span cannot be partitioned across the workers.
    #[error("Invalid partition: {reason}")]
    InvalidPartition { reason: String },

    /// At least one worker terminated unsuccessfully.
    #[error("{} of {total} workers failed (worker {})", .failed.len(), join_indices(.failed))]
    WorkerFailure { failed: Vec<usize>, total: usize },

    /// The job was interrupted before all workers finished.
    #[error("Job cancelled ({completed} of {total} workers completed)")]
    Cancelled { completed: usize, total: usize },

    /// A worker's shard file does not exist at merge time.
    #[error("Missing shard for worker {worker}: {}", .path.display())]
    MissingShard { worker: usize, path: PathBuf },

    /// A worker's shard could not be read or the merged file not written.
    #[error("Failed to merge shard of worker {worker}: {source}")]
    Merge {
        worker: usize,
        #[source]
        source: std::io::Error,
    },
}

/// The stage of a job at which an [`Error`] occurred.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Config,
    Query,
    Partition,
    Worker(Vec<usize>),
    Cancelled,
    Merge,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Config => write!(f, "config"),
            Stage::Query => write!(f, "query"),
            Stage::Partition => write!(f, "partition"),
            Stage::Worker(indices) => write!(f, "worker {}", join_indices(indices)),
            Stage::Cancelled => write!(f, "cancelled"),
            Stage::Merge => write!(f, "merge"),
        }
    }
}

impl Error {
    /// Returns the job stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Error::InvalidJob { .. } | Error::InvalidTemplate { .. } => Stage::Config,
            Error::ResourceQuery { .. } | Error::ChromosomeNotFound { .. } => Stage::Query,
            Error::InvalidPartition { .. } => Stage::Partition,
            Error::WorkerFailure { failed, .. } => Stage::Worker(failed.clone()),
            Error::Cancelled { .. } => Stage::Cancelled,
            Error::MissingShard { .. } | Error::Merge { .. } => Stage::Merge,
        }
    }

    /// Process exit code reported for this error.
    ///
    /// Cancellation uses the conventional `128 + SIGINT`.
    pub fn exit_code(&self) -> u8 {
        match self.stage() {
            Stage::Config => 2,
            Stage::Query => 3,
            Stage::Partition => 4,
            Stage::Worker(_) => 5,
            Stage::Merge => 6,
            Stage::Cancelled => 130,
        }
    }
}

fn join_indices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
