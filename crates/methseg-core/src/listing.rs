//! Typed view over the chunk lister's tabular output.
//!
//! The lister prints a table with one row per chromosome. Rows are pipe-,
//! tab-, comma- or whitespace-separated; the first cell is the chromosome id
//! and the first unsigned integer after it is the chunk count. Banner lines,
//! separators, headers and `key: value` metadata are ignored.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Chunk counts keyed by chromosome id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkListing {
    counts: BTreeMap<String, u64>,
}

impl ChunkListing {
    /// Parses the lister's output. Unrecognized lines are skipped; when a
    /// chromosome is listed more than once the first row wins.
    pub fn parse(text: &str) -> Self {
        let mut counts = BTreeMap::new();
        for line in text.lines() {
            if let Some((chromosome, count)) = parse_row(line) {
                counts.entry(chromosome.to_string()).or_insert(count);
            }
        }
        Self { counts }
    }

    /// Chunk count for `chromosome`, if listed.
    pub fn chunk_count(&self, chromosome: &str) -> Option<u64> {
        self.counts.get(chromosome).copied()
    }

    /// Chunk count for `chromosome`, failing if it is absent or zero.
    ///
    /// # Errors
    ///
    /// - [`Error::ChromosomeNotFound`] if no row names `chromosome`.
    /// - [`Error::ResourceQuery`] if the row reports zero chunks.
    pub fn require(&self, chromosome: &str, input: &Path) -> Result<u64> {
        match self.chunk_count(chromosome) {
            Some(0) => Err(Error::ResourceQuery {
                reason: format!(
                    "chromosome `{chromosome}` has no chunks in {}",
                    input.display()
                ),
            }),
            Some(count) => Ok(count),
            None => Err(Error::ChromosomeNotFound {
                chromosome: chromosome.to_string(),
                input: input.to_path_buf(),
            }),
        }
    }

    /// Listed chromosome ids in sorted order.
    pub fn chromosomes(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

fn parse_row(line: &str) -> Option<(&str, u64)> {
    let mut cells = line
        .split(|c: char| c == '|' || c == ',' || c.is_whitespace())
        .filter(|cell| !cell.is_empty());

    let chromosome = cells.next()?;
    if chromosome.ends_with(':') {
        return None;
    }

    for cell in cells {
        if let Ok(count) = cell.parse::<u64>() {
            return Some((chromosome, count));
        }
        // `Chunk size: 50000` and similar metadata.
        if cell.ends_with(':') {
            return None;
        }
    }
    None
}
