//! Per-worker output naming and the final merge.
//!
//! Worker `i` of chromosome `chr` writes `{prefix}_{chr}_{i}.tsv`. Once every
//! worker has completed, [`merge_shards`] concatenates the shards byte for
//! byte in worker-index order into `{prefix}_{chr}_all.tsv`.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{self, AsyncWriteExt, BufWriter};

/// Extension of shard and merged files.
pub const SHARD_EXTENSION: &str = "tsv";

/// Suffix used in place of the worker index for the merged file.
pub const MERGED_SUFFIX: &str = "all";

/// Naming scheme for one chromosome's shards and merged output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardLayout {
    prefix: String,
    chromosome: String,
}

impl ShardLayout {
    pub fn new(prefix: impl Into<String>, chromosome: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            chromosome: chromosome.into(),
        }
    }

    /// Output path of `worker`.
    pub fn shard_path(&self, worker: usize) -> PathBuf {
        self.path_with_suffix(&worker.to_string())
    }

    /// Output paths of workers `0..workers`, in index order.
    pub fn shard_paths(&self, workers: usize) -> Vec<PathBuf> {
        (0..workers).map(|worker| self.shard_path(worker)).collect()
    }

    /// Path of the merged result.
    pub fn merged_path(&self) -> PathBuf {
        self.path_with_suffix(MERGED_SUFFIX)
    }

    fn path_with_suffix(&self, suffix: &str) -> PathBuf {
        PathBuf::from(format!(
            "{}_{}_{}.{}",
            self.prefix, self.chromosome, suffix, SHARD_EXTENSION
        ))
    }
}

/// Result of a successful merge.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MergeStats {
    pub shards: usize,
    pub bytes: u64,
    pub path: PathBuf,
}

/// Concatenates the shards of workers `0..workers` into the merged path.
///
/// Every shard is checked before anything is written, and the output is
/// staged in a `.partial` sibling that is renamed into place only once all
/// shards were copied. A failed merge therefore never leaves a file under the
/// merged name.
///
/// # Errors
///
/// - [`Error::MissingShard`] for the lowest-indexed shard that does not exist.
/// - [`Error::Merge`] if a shard cannot be read or the output written.
#[cfg_attr(feature = "tracing", tracing::instrument(skip(layout), fields(path = %layout.merged_path().display())))]
pub async fn merge_shards(layout: &ShardLayout, workers: usize) -> Result<MergeStats> {
    let shards = layout.shard_paths(workers);

    for (worker, path) in shards.iter().enumerate() {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(missing(worker, path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(missing(worker, path)),
            Err(source) => return Err(Error::Merge { worker, source }),
        }
    }

    let merged = layout.merged_path();
    let staging = staging_path(&merged);

    match copy_all(&shards, &staging).await {
        Ok(bytes) => {
            fs::rename(&staging, &merged)
                .await
                .map_err(|source| Error::Merge {
                    worker: workers.saturating_sub(1),
                    source,
                })?;

            #[cfg(feature = "tracing")]
            tracing::debug!(shards = workers, bytes, "Merged shards");

            Ok(MergeStats {
                shards: workers,
                bytes,
                path: merged,
            })
        }
        Err(err) => {
            let _ = fs::remove_file(&staging).await;
            Err(err)
        }
    }
}

async fn copy_all(shards: &[PathBuf], staging: &Path) -> Result<u64> {
    let out = File::create(staging)
        .await
        .map_err(|source| Error::Merge { worker: 0, source })?;
    let mut out = BufWriter::new(out);
    let mut bytes = 0;

    for (worker, path) in shards.iter().enumerate() {
        let mut shard = match File::open(path).await {
            Ok(file) => file,
            // Removed between the existence check and now.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(missing(worker, path)),
            Err(source) => return Err(Error::Merge { worker, source }),
        };
        bytes += io::copy(&mut shard, &mut out)
            .await
            .map_err(|source| Error::Merge { worker, source })?;
    }

    let last = shards.len().saturating_sub(1);
    out.flush()
        .await
        .map_err(|source| Error::Merge {
            worker: last,
            source,
        })?;
    out.into_inner()
        .sync_all()
        .await
        .map_err(|source| Error::Merge {
            worker: last,
            source,
        })?;

    Ok(bytes)
}

/// Deletes the shards of workers `0..workers`. Already-missing shards are
/// ignored.
pub async fn remove_shards(layout: &ShardLayout, workers: usize) -> io::Result<()> {
    for path in layout.shard_paths(workers) {
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn staging_path(merged: &Path) -> PathBuf {
    let mut name = merged.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn missing(worker: usize, path: &Path) -> Error {
    Error::MissingShard {
        worker,
        path: path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn layout_in(dir: &Path) -> ShardLayout {
        ShardLayout::new(dir.join("sample").to_string_lossy(), "chr20")
    }

    #[test]
    fn names_shards_and_merged_output() {
        let layout = ShardLayout::new("out/sample", "chr20");
        assert_eq!(layout.shard_path(0), PathBuf::from("out/sample_chr20_0.tsv"));
        assert_eq!(layout.shard_path(3), PathBuf::from("out/sample_chr20_3.tsv"));
        assert_eq!(
            layout.merged_path(),
            PathBuf::from("out/sample_chr20_all.tsv")
        );
    }

    #[test]
    fn shard_paths_are_distinct() {
        let layout = ShardLayout::new("p", "chr1");
        let paths = layout.shard_paths(16);
        let unique: std::collections::HashSet<_> = paths.iter().collect();
        assert_eq!(paths.len(), 16);
        assert_eq!(unique.len(), 16);
        assert!(!paths.contains(&layout.merged_path()));
    }

    #[tokio::test]
    async fn merges_three_shards_in_index_order() {
        let dir = tempdir().unwrap();
        let layout = layout_in(dir.path());
        let contents: [&[u8]; 3] = [
            b"chr20\t0\t100\tseg0\n",
            b"chr20\t100\t250\tseg1\nchr20\t250\t300\tseg2\n",
            b"chr20\t300\t420\tseg3",
        ];
        // Written out of order on purpose.
        for worker in [2, 0, 1] {
            std::fs::write(layout.shard_path(worker), contents[worker]).unwrap();
        }

        let stats = merge_shards(&layout, 3).await.unwrap();

        let expected: Vec<u8> = contents.concat();
        let merged = std::fs::read(layout.merged_path()).unwrap();
        assert_eq!(merged, expected);
        assert_eq!(stats.shards, 3);
        assert_eq!(stats.bytes, expected.len() as u64);
        assert_eq!(stats.path, layout.merged_path());
        assert!(!staging_path(&layout.merged_path()).exists());
    }

    #[tokio::test]
    async fn missing_shard_is_named_and_nothing_is_written() {
        let dir = tempdir().unwrap();
        let layout = layout_in(dir.path());
        for worker in 0..3 {
            std::fs::write(layout.shard_path(worker), format!("row {worker}\n")).unwrap();
        }
        std::fs::remove_file(layout.shard_path(1)).unwrap();

        let err = merge_shards(&layout, 3).await.unwrap_err();
        match err {
            Error::MissingShard { worker, path } => {
                assert_eq!(worker, 1);
                assert_eq!(path, layout.shard_path(1));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!layout.merged_path().exists());
        assert!(!staging_path(&layout.merged_path()).exists());
    }

    #[tokio::test]
    async fn replaces_previous_merged_output() {
        let dir = tempdir().unwrap();
        let layout = layout_in(dir.path());
        std::fs::write(layout.merged_path(), b"stale").unwrap();
        std::fs::write(layout.shard_path(0), b"fresh\n").unwrap();

        merge_shards(&layout, 1).await.unwrap();
        assert_eq!(std::fs::read(layout.merged_path()).unwrap(), b"fresh\n");
    }

    #[tokio::test]
    async fn empty_shards_merge_to_empty_file() {
        let dir = tempdir().unwrap();
        let layout = layout_in(dir.path());
        for worker in 0..2 {
            std::fs::write(layout.shard_path(worker), b"").unwrap();
        }
        let stats = merge_shards(&layout, 2).await.unwrap();
        assert_eq!(stats.bytes, 0);
        assert!(layout.merged_path().exists());
    }

    #[tokio::test]
    async fn removes_shards_but_keeps_merged() {
        let dir = tempdir().unwrap();
        let layout = layout_in(dir.path());
        for worker in 0..2 {
            std::fs::write(layout.shard_path(worker), b"x").unwrap();
        }
        merge_shards(&layout, 2).await.unwrap();
        remove_shards(&layout, 3).await.unwrap();

        assert!(!layout.shard_path(0).exists());
        assert!(!layout.shard_path(1).exists());
        assert!(layout.merged_path().exists());
    }
}
