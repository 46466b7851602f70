//! Dictionary partitioning
//!
//! A partition is a contiguous half-open index range `[min, max)` over the
//! dictionary. The two slicing strategies both walk a view's cursor from
//! start to end with no gap and no overlap, so the union of the returned
//! partitions always equals the view's own range. Both restore the cursor
//! to the view start before returning.

use super::DictionaryView;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Partitioning requested with a non-positive partition count or chunk size.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("invalid partitioning argument: {0}")]
    InvalidArgument(&'static str),
}

/// Half-open line-index range `[min, max)` over the dictionary.
///
/// Immutable once created; owned by whichever attack or sub-job currently
/// holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub min: usize,
    pub max: usize,
}

impl Partition {
    pub fn new(min: usize, max: usize) -> Self {
        debug_assert!(min <= max);
        Self { min, max }
    }

    pub fn len(&self) -> usize {
        self.max - self.min
    }

    pub fn is_empty(&self) -> bool {
        self.min == self.max
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.min && index < self.max
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.min, self.max)
    }
}

/// Split a view into `n` balanced partitions.
///
/// Computes `base = count / n` and `remainder = count % n`, emitting
/// `remainder` partitions of size `base + 1` first, then partitions of size
/// `base`. Sizes differ by at most one and the ranges exactly cover the
/// view. When `n` exceeds the line count, one partition per line is
/// returned.
pub fn balanced_split(
    view: &mut DictionaryView,
    n: usize,
) -> Result<Vec<Partition>, PartitionError> {
    if n == 0 {
        return Err(PartitionError::InvalidArgument(
            "partition count must be positive",
        ));
    }

    let base = view.count_lines() / n;
    let mut leftovers = view.count_lines() % n;
    let mut partitions = Vec::with_capacity(n.min(view.count_lines()));

    view.rewind();
    while view.ready() {
        let min = view.position();
        if leftovers > 0 {
            view.seek(base as i64 + 1);
            leftovers -= 1;
        } else {
            view.seek(base as i64);
        }
        partitions.push(Partition::new(min, view.position()));
    }
    view.rewind();

    Ok(partitions)
}

/// Split a view into chunks of exactly `size` lines, the final chunk
/// possibly smaller.
pub fn fixed_chunks(
    view: &mut DictionaryView,
    size: usize,
) -> Result<Vec<Partition>, PartitionError> {
    if size == 0 {
        return Err(PartitionError::InvalidArgument(
            "chunk size must be positive",
        ));
    }

    let mut partitions = Vec::new();

    view.rewind();
    while view.ready() {
        let min = view.position();
        view.seek(size as i64);
        partitions.push(Partition::new(min, view.position()));
    }
    view.rewind();

    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_of(len: usize) -> DictionaryView {
        DictionaryView::from_lines((0..len).map(|i| format!("word{}", i)).collect())
    }

    /// Partitions must be gapless, non-overlapping, and cover the full range.
    fn assert_exact_coverage(partitions: &[Partition], len: usize) {
        let mut expected_min = 0;
        for p in partitions {
            assert_eq!(p.min, expected_min, "gap or overlap at {}", p);
            assert!(p.min <= p.max);
            expected_min = p.max;
        }
        assert_eq!(expected_min, len, "partitions do not reach dictionary end");
    }

    #[test]
    fn test_balanced_split_ten_by_three() {
        let mut view = view_of(10);
        let partitions = balanced_split(&mut view, 3).unwrap();

        assert_eq!(partitions.len(), 3);
        assert_exact_coverage(&partitions, 10);

        let mut sizes: Vec<usize> = partitions.iter().map(|p| p.len()).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![3, 3, 4]);
    }

    #[test]
    fn test_balanced_split_restores_cursor() {
        let mut view = view_of(10);
        view.seek(4);
        balanced_split(&mut view, 3).unwrap();
        assert_eq!(view.position(), 0);
    }

    #[test]
    fn test_balanced_split_even_division() {
        let mut view = view_of(12);
        let partitions = balanced_split(&mut view, 4).unwrap();
        assert_eq!(partitions.len(), 4);
        assert_exact_coverage(&partitions, 12);
        assert!(partitions.iter().all(|p| p.len() == 3));
    }

    #[test]
    fn test_balanced_split_more_partitions_than_lines() {
        let mut view = view_of(3);
        let partitions = balanced_split(&mut view, 8).unwrap();
        assert_eq!(partitions.len(), 3);
        assert_exact_coverage(&partitions, 3);
        assert!(partitions.iter().all(|p| p.len() == 1));
    }

    #[test]
    fn test_balanced_split_empty_dictionary() {
        let mut view = view_of(0);
        let partitions = balanced_split(&mut view, 4).unwrap();
        assert!(partitions.is_empty());
    }

    #[test]
    fn test_balanced_split_zero_count_rejected() {
        let mut view = view_of(10);
        assert_eq!(
            balanced_split(&mut view, 0),
            Err(PartitionError::InvalidArgument(
                "partition count must be positive"
            ))
        );
    }

    #[test]
    fn test_balanced_split_size_property() {
        // Sizes differ by at most one for a spread of dictionary sizes and
        // partition counts.
        for len in [1usize, 2, 7, 10, 31, 100] {
            for n in 1..=len {
                let mut view = view_of(len);
                let partitions = balanced_split(&mut view, n).unwrap();
                assert_eq!(partitions.len(), n, "len={} n={}", len, n);
                assert_exact_coverage(&partitions, len);

                let min_size = partitions.iter().map(|p| p.len()).min().unwrap();
                let max_size = partitions.iter().map(|p| p.len()).max().unwrap();
                assert!(max_size - min_size <= 1, "len={} n={}", len, n);
            }
        }
    }

    #[test]
    fn test_fixed_chunks_ten_by_three() {
        let mut view = view_of(10);
        let partitions = fixed_chunks(&mut view, 3).unwrap();
        assert_eq!(
            partitions,
            vec![
                Partition::new(0, 3),
                Partition::new(3, 6),
                Partition::new(6, 9),
                Partition::new(9, 10),
            ]
        );
        assert_eq!(view.position(), 0);
    }

    #[test]
    fn test_fixed_chunks_exact_division() {
        let mut view = view_of(9);
        let partitions = fixed_chunks(&mut view, 3).unwrap();
        assert_eq!(partitions.len(), 3);
        assert_exact_coverage(&partitions, 9);
        assert!(partitions.iter().all(|p| p.len() == 3));
    }

    #[test]
    fn test_fixed_chunks_zero_size_rejected() {
        let mut view = view_of(10);
        assert!(fixed_chunks(&mut view, 0).is_err());
    }

    #[test]
    fn test_fixed_chunks_respects_view_restriction() {
        let full = view_of(10);
        let mut sub = full.restrict(2, 8).unwrap();
        let partitions = fixed_chunks(&mut sub, 4).unwrap();
        assert_eq!(
            partitions,
            vec![Partition::new(2, 6), Partition::new(6, 8)]
        );
    }
}
