//! Splits a chromosome's chunk span across a fixed number of workers.
//!
//! The span is `total_chunks * chunk_size`. Every worker gets the same
//! adjusted chunk size `span / workers` (floor) and processes the chunk at its
//! own index. When the division is not exact the tail of the span is not
//! assigned to anyone; the plan reports it through [`PartitionPlan::uncovered_span`]
//! so the caller can warn or refuse.

use crate::{Error, Result};
use core::ops::Range;

/// Per-worker chunk sizing for one chromosome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PartitionPlan {
    total_chunks: u64,
    chunk_size: u64,
    workers: usize,
    adjusted_chunk_size: u64,
}

impl PartitionPlan {
    /// Computes the plan.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPartition`] if `workers` or `chunk_size` is
    /// zero, if the span overflows, or if there are more workers than span
    /// units (the adjusted chunk size would be zero).
    pub fn new(total_chunks: u64, chunk_size: u64, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(invalid("worker count must be greater than 0".to_string()));
        }
        if chunk_size == 0 {
            return Err(invalid("chunk size must be greater than 0".to_string()));
        }

        let total_span = total_chunks.checked_mul(chunk_size).ok_or_else(|| {
            invalid(format!(
                "span of {total_chunks} chunks x {chunk_size} overflows"
            ))
        })?;

        let adjusted_chunk_size = total_span / workers as u64;
        if adjusted_chunk_size == 0 {
            return Err(invalid(format!(
                "{workers} workers exceed the span of {total_span} ({total_chunks} chunks x {chunk_size})"
            )));
        }

        Ok(Self {
            total_chunks,
            chunk_size,
            workers,
            adjusted_chunk_size,
        })
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Chunk size each worker is launched with. Always at least 1.
    pub fn adjusted_chunk_size(&self) -> u64 {
        self.adjusted_chunk_size
    }

    pub fn total_span(&self) -> u64 {
        self.total_chunks * self.chunk_size
    }

    /// Part of the span assigned to some worker.
    pub fn covered_span(&self) -> u64 {
        self.adjusted_chunk_size * self.workers as u64
    }

    /// Tail of the span left unassigned by the floor division.
    pub fn uncovered_span(&self) -> u64 {
        self.total_span() - self.covered_span()
    }

    pub fn is_exact(&self) -> bool {
        self.uncovered_span() == 0
    }

    /// Span range handled by `worker`.
    pub fn range(&self, worker: usize) -> Option<Range<u64>> {
        (worker < self.workers).then(|| {
            let start = worker as u64 * self.adjusted_chunk_size;
            start..start + self.adjusted_chunk_size
        })
    }

    /// Span ranges of all workers in index order.
    pub fn ranges(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        (0..self.workers).filter_map(|worker| self.range(worker))
    }
}

fn invalid(reason: String) -> Error {
    Error::InvalidPartition { reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_chunks_over_four_workers() {
        let plan = PartitionPlan::new(10, 200_000, 4).unwrap();
        assert_eq!(plan.total_span(), 2_000_000);
        assert_eq!(plan.adjusted_chunk_size(), 500_000);
        assert!(plan.is_exact());
        assert_eq!(
            plan.ranges().collect::<Vec<_>>(),
            vec![
                0..500_000,
                500_000..1_000_000,
                1_000_000..1_500_000,
                1_500_000..2_000_000
            ]
        );
    }

    #[test]
    fn adjusted_size_is_floor_and_positive() {
        for total_chunks in 1..12_u64 {
            for chunk_size in [1_u64, 3, 7, 100] {
                let span = total_chunks * chunk_size;
                for workers in 1..=span.min(40) as usize {
                    let plan = PartitionPlan::new(total_chunks, chunk_size, workers).unwrap();
                    assert_eq!(plan.adjusted_chunk_size(), span / workers as u64);
                    assert!(plan.adjusted_chunk_size() >= 1);
                    assert!(plan.covered_span() <= span);
                    assert!(plan.uncovered_span() < workers as u64);
                }
            }
        }
    }

    #[test]
    fn reports_uncovered_tail() {
        let plan = PartitionPlan::new(10, 1, 3).unwrap();
        assert_eq!(plan.adjusted_chunk_size(), 3);
        assert_eq!(plan.covered_span(), 9);
        assert_eq!(plan.uncovered_span(), 1);
        assert!(!plan.is_exact());
        assert_eq!(plan.range(2), Some(6..9));
        assert_eq!(plan.range(3), None);
    }

    #[test]
    fn rejects_more_workers_than_span() {
        let err = PartitionPlan::new(2, 2, 5).unwrap_err();
        assert!(matches!(err, Error::InvalidPartition { .. }), "{err}");
    }

    #[test]
    fn rejects_zero_inputs() {
        assert!(matches!(
            PartitionPlan::new(10, 0, 4),
            Err(Error::InvalidPartition { .. })
        ));
        assert!(matches!(
            PartitionPlan::new(10, 5, 0),
            Err(Error::InvalidPartition { .. })
        ));
        assert!(matches!(
            PartitionPlan::new(0, 5, 1),
            Err(Error::InvalidPartition { .. })
        ));
    }

    #[test]
    fn rejects_overflowing_span() {
        let err = PartitionPlan::new(u64::MAX, 2, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidPartition { .. }));
    }
}
