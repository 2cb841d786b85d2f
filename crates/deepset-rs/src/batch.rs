//! Batching of variable-length replicate sets into one contiguous tensor.
//!
//! [`stack`] concatenates every set along the replicate axis and returns a [`GroupingIndex`]
//! describing which rows belong to which set. The index is the only bookkeeping needed to
//! [`split`] a transformed batch back per set, or to [`aggregate_groups`] it directly.

use std::ops::Range;

use candle_core::Tensor;
use tracing::trace;

use crate::aggregate::Aggregation;
use crate::error::{ensure_or, Result};
use crate::shape::{ReplicateShape, REPLICATE_AXIS};

/// Half-open row ranges owned by each set in a batched tensor.
///
/// Built per call and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingIndex {
    offsets: Vec<usize>,
}

impl GroupingIndex {
    /// Builds the index from per-set replicate counts, preserving set order.
    pub fn from_counts(counts: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(counts.len() + 1);
        let mut total = 0usize;
        offsets.push(total);
        for &count in counts {
            total += count;
            offsets.push(total);
        }
        Self { offsets }
    }

    /// Number of sets described by the index.
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of rows across all sets.
    pub fn total(&self) -> usize {
        self.offsets[self.offsets.len() - 1]
    }

    /// Rows owned by set `i`.
    pub fn range(&self, i: usize) -> Range<usize> {
        self.offsets[i]..self.offsets[i + 1]
    }

    pub fn count(&self, i: usize) -> usize {
        self.offsets[i + 1] - self.offsets[i]
    }

    pub fn counts(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.offsets.windows(2).map(|w| w[0]..w[1])
    }

    /// Fails unless `rows` equals the total the index describes.
    pub(crate) fn ensure_rows(&self, rows: usize, what: &str) -> Result<()> {
        ensure_or!(
            rows == self.total(),
            shape_mismatch,
            "{what}: batched tensor has {rows} rows but the grouping index covers {}",
            self.total()
        );
        Ok(())
    }
}

/// Checks that every set shares one replicate shape and dtype without touching the data.
pub fn validate_sets(sets: &[Tensor]) -> Result<ReplicateShape> {
    ensure_or!(
        !sets.is_empty(),
        dimension_mismatch,
        "replicate collection must contain at least one set"
    );
    let reference = ReplicateShape::of(&sets[0])?;
    let dtype = sets[0].dtype();
    for (i, set) in sets.iter().enumerate().skip(1) {
        let shape = ReplicateShape::of(set)?;
        reference.ensure_same(&shape, &format!("set {i}"))?;
        ensure_or!(
            set.dtype() == dtype,
            shape_mismatch,
            "set {i} has dtype {:?}, expected {:?}",
            set.dtype(),
            dtype
        );
    }
    Ok(reference)
}

/// Concatenates all sets along the replicate axis.
pub fn stack(sets: &[Tensor]) -> Result<(Tensor, GroupingIndex)> {
    validate_sets(sets)?;
    let counts: Vec<usize> = sets.iter().map(|set| set.dims()[REPLICATE_AXIS]).collect();
    let index = GroupingIndex::from_counts(&counts);
    trace!(sets = index.len(), rows = index.total(), "stacked replicate sets");
    let batched = Tensor::cat(sets, REPLICATE_AXIS)?;
    Ok((batched, index))
}

/// Inverse of [`stack`]: slices each set's rows out of a batched tensor.
pub fn split(batched: &Tensor, index: &GroupingIndex) -> Result<Vec<Tensor>> {
    let rows = batched.dims().first().copied().unwrap_or(0);
    index.ensure_rows(rows, "split")?;
    index
        .ranges()
        .map(|range| Ok(batched.narrow(REPLICATE_AXIS, range.start, range.len())?))
        .collect()
}

/// Reduces each set's rows separately and concatenates the results, one row per set.
///
/// Only the rows in a set's own range take part in its reduction.
pub fn aggregate_groups(
    batched: &Tensor,
    index: &GroupingIndex,
    aggregation: &Aggregation,
) -> Result<Tensor> {
    ensure_or!(
        !index.is_empty(),
        dimension_mismatch,
        "cannot aggregate an empty grouping index"
    );
    let rows = batched.dims().first().copied().unwrap_or(0);
    index.ensure_rows(rows, "aggregate_groups")?;
    let reduced = index
        .ranges()
        .map(|range| {
            let group = batched.narrow(REPLICATE_AXIS, range.start, range.len())?;
            aggregation.reduce(&group, REPLICATE_AXIS)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::cat(&reduced, REPLICATE_AXIS)?)
}
