use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use methseg_core::{
    CommandTemplate, DEFAULT_CHUNK_SIZE, DEFAULT_READ_GROUP, JobSpec, Placeholder,
};
use std::path::PathBuf;

/// Chunk lister invoked once per job to count a chromosome's chunks.
pub const DEFAULT_LIST_CHUNKS_COMMAND: &str =
    "meth5 --chunk_size {chunk_size} list_chunks -i {input}";

/// Segmentation command invoked once per worker.
pub const DEFAULT_SEGMENT_COMMAND: &str = "pycometh Meth_Seg -i {input} -c {chunk_size} -n {chunk} -r {read_group} -s {chromosome} -t {output}";

/// What the supervisor does when a worker fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Let every other worker run to completion, then report the failure.
    Finish,
    /// Terminate all remaining workers as soon as one fails.
    FailFast,
}

/// Runtime configuration for the `methseg-runner` binary.
///
/// Positional arguments describe the job; everything else has a default
/// suitable for running `pycometh Meth_Seg` over a MetH5 store and can be
/// overridden on the command line or through the environment (including a
/// `.env` file).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "methseg-runner",
    version,
    about = "Runs methylation segmentation in parallel across the chunks of a chromosome"
)]
pub struct CliArgs {
    /// Chunk-indexed methylation store to segment.
    pub input: PathBuf,

    /// Prefix of the per-worker shards and the merged result.
    ///
    /// Worker `i` writes `{prefix}_{chromosome}_{i}.tsv`; the merged file is
    /// `{prefix}_{chromosome}_all.tsv`.
    pub output_prefix: String,

    /// Chromosome to segment.
    pub chromosome: String,

    /// Number of segmentation subprocesses to run in parallel.
    pub workers: usize,

    /// Chunk size used to query the chunk count of the chromosome.
    ///
    /// Environment variable: `CHUNK_SIZE`
    #[arg(long, env = "CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Read-group key handed to the segmenter.
    ///
    /// Environment variable: `READ_GROUP`
    #[arg(long, env = "READ_GROUP", default_value_t = String::from(DEFAULT_READ_GROUP))]
    pub read_group: String,

    /// Command that prints the chunk count of every chromosome.
    ///
    /// May reference `{input}`, `{chromosome}`, `{chunk_size}` and
    /// `{read_group}`.
    ///
    /// Environment variable: `LIST_CHUNKS_COMMAND`
    #[arg(long, env = "LIST_CHUNKS_COMMAND", default_value_t = String::from(DEFAULT_LIST_CHUNKS_COMMAND))]
    pub list_chunks_command: String,

    /// Command run by each worker. Must reference `{chunk}` and `{output}`.
    ///
    /// Environment variable: `SEGMENT_COMMAND`
    #[arg(long, env = "SEGMENT_COMMAND", default_value_t = String::from(DEFAULT_SEGMENT_COMMAND))]
    pub segment_command: String,

    /// Whether a failing worker stops the others.
    ///
    /// Environment variable: `FAILURE_POLICY`
    #[arg(long, env = "FAILURE_POLICY", value_enum, default_value_t = FailurePolicy::Finish)]
    pub failure_policy: FailurePolicy,

    /// Wall-clock limit per worker. Workers exceeding it are terminated and
    /// count as failed.
    ///
    /// Environment variable: `TASK_TIMEOUT_SECS`
    #[arg(long, env = "TASK_TIMEOUT_SECS")]
    pub task_timeout_secs: Option<u64>,

    /// Time a terminated worker gets to exit after SIGTERM before it is
    /// killed.
    ///
    /// Environment variable: `KILL_GRACE_SECS`
    #[arg(long, env = "KILL_GRACE_SECS", default_value_t = 5)]
    pub kill_grace_secs: u64,

    /// Refuse to run when the worker count does not evenly divide the chunk
    /// span, instead of warning about the unassigned tail.
    ///
    /// Environment variable: `STRICT_PARTITION`
    #[arg(long, env = "STRICT_PARTITION", default_value_t = false)]
    pub strict_partition: bool,

    /// Delete the per-worker shards after a successful merge.
    #[arg(long, default_value_t = false)]
    pub remove_shards: bool,

    /// Write a JSON job summary to this path, whether or not the job
    /// succeeds.
    ///
    /// Environment variable: `SUMMARY_PATH`
    #[arg(long = "summary", env = "SUMMARY_PATH")]
    pub summary_path: Option<PathBuf>,

    /// Query and plan, log the worker commands, but do not run them.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Log at debug level.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    ///
    /// Environment variable: `LOG_JSON`
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Extra arguments appended to every segmentation command.
    #[arg(last = true)]
    pub worker_args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub job: JobSpec,
    pub list_command: CommandTemplate,
    pub segment_command: CommandTemplate,
    pub worker_args: Vec<String>,
    pub failure_policy: FailurePolicy,
    pub task_timeout: Option<Duration>,
    pub kill_grace: Duration,
    pub strict_partition: bool,
    pub remove_shards: bool,
    pub summary_path: Option<PathBuf>,
    pub dry_run: bool,
    pub verbose: bool,
    pub log_json: bool,
}

impl TryFrom<CliArgs> for RunnerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let job = JobSpec::new(
            args.input,
            args.output_prefix,
            args.chromosome,
            args.workers,
            args.chunk_size,
            args.read_group,
        )?;

        let list_command: CommandTemplate = args.list_chunks_command.parse()?;
        list_command.restrict(&[
            Placeholder::Input,
            Placeholder::Chromosome,
            Placeholder::ChunkSize,
            Placeholder::ReadGroup,
        ])?;

        let segment_command: CommandTemplate = args.segment_command.parse()?;
        segment_command.require(&[Placeholder::Chunk, Placeholder::Output])?;

        if args.task_timeout_secs == Some(0) {
            bail!("TASK_TIMEOUT_SECS must be greater than 0");
        }

        Ok(Self {
            job,
            list_command,
            segment_command,
            worker_args: args.worker_args,
            failure_policy: args.failure_policy,
            task_timeout: args.task_timeout_secs.map(Duration::from_secs),
            kill_grace: Duration::from_secs(args.kill_grace_secs),
            strict_partition: args.strict_partition,
            remove_shards: args.remove_shards,
            summary_path: args.summary_path,
            dry_run: args.dry_run,
            verbose: args.verbose,
            log_json: args.log_json,
        })
    }
}
