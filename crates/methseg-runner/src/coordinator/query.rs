//! Chunk count query.
//!
//! Runs the chunk lister once, parses its table and looks up the job's
//! chromosome. The lister is abandoned (and killed) if the job is cancelled
//! while it runs.

use methseg_core::{ChunkListing, CommandTemplate, Error, JobSpec, Result, TemplateVars};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Outcome of a chunk query.
#[derive(Debug)]
pub enum QueryOutcome {
    Chunks(u64),
    Cancelled,
}

/// Returns the number of chunks `job.chromosome()` has in `job.input()`.
///
/// # Errors
///
/// - [`Error::InvalidTemplate`] if the list command cannot be rendered.
/// - [`Error::ResourceQuery`] if the lister cannot be started, exits
///   unsuccessfully, or lists zero chunks for the chromosome.
/// - [`Error::ChromosomeNotFound`] if the listing has no row for the
///   chromosome.
#[tracing::instrument(skip_all, fields(chromosome = job.chromosome(), input = %job.input().display()))]
pub async fn query_chunk_count(
    job: &JobSpec,
    template: &CommandTemplate,
    shutdown: &CancellationToken,
) -> Result<QueryOutcome> {
    let command = template.render(&TemplateVars {
        input: Some(job.input()),
        chromosome: Some(job.chromosome()),
        chunk_size: Some(job.chunk_size()),
        read_group: Some(job.read_group()),
        ..TemplateVars::default()
    })?;

    tracing::debug!(%command, "Listing chunks");

    let child = Command::new(command.program())
        .args(command.args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| query_error(format!("cannot start `{command}`: {e}")))?;

    let output = tokio::select! {
        output = child.wait_with_output() => {
            output.map_err(|e| query_error(format!("`{command}` did not complete: {e}")))?
        }
        _ = shutdown.cancelled() => {
            tracing::warn!("Chunk query interrupted");
            return Ok(QueryOutcome::Cancelled);
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(query_error(format!(
            "`{command}` exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let listing = ChunkListing::parse(&String::from_utf8_lossy(&output.stdout));
    tracing::debug!(chromosomes = listing.len(), "Parsed chunk listing");

    let chunks = listing.require(job.chromosome(), job.input())?;
    tracing::info!(chunks, "Queried chunk count");
    Ok(QueryOutcome::Chunks(chunks))
}

fn query_error(reason: String) -> Error {
    Error::ResourceQuery { reason }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use core::time::Duration;
    use std::time::Instant;

    fn job(chromosome: &str) -> JobSpec {
        JobSpec::new("sample.m5", "out", chromosome, 2, 100, "haplotype").unwrap()
    }

    fn template(source: &str) -> CommandTemplate {
        source.parse().unwrap()
    }

    #[tokio::test]
    async fn parses_lister_output() {
        let lister = template(
            "sh -c 'printf \"Chunk size: 50000\\nchr1 | 10\\nchr20 | 4\\n\"' {input} {chunk_size}",
        );
        let outcome = query_chunk_count(&job("chr20"), &lister, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, QueryOutcome::Chunks(4)));
    }

    #[tokio::test]
    async fn missing_chromosome_is_reported() {
        let lister = template("sh -c 'echo chr1 10'");
        let err = query_chunk_count(&job("chrX"), &lister, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::ChromosomeNotFound { ref chromosome, .. } if chromosome == "chrX"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn failing_lister_is_a_query_error() {
        let lister = template("sh -c 'echo broken store >&2; exit 3'");
        let err = query_chunk_count(&job("chr1"), &lister, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceQuery { .. }), "{err}");
        assert!(err.to_string().contains("broken store"), "{err}");
    }

    #[tokio::test]
    async fn unknown_program_is_a_query_error() {
        let lister = template("/nonexistent/meth5 list_chunks -i {input}");
        let err = query_chunk_count(&job("chr1"), &lister, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResourceQuery { .. }), "{err}");
    }

    #[tokio::test]
    async fn cancellation_abandons_query() {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = query_chunk_count(&job("chr1"), &template("sleep 30"), &shutdown)
            .await
            .unwrap();
        assert!(matches!(outcome, QueryOutcome::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
