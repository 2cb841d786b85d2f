//! Shape bookkeeping for replicate tensors.
//!
//! Dense replicate sets store replicates along the leading axis. The helpers here compare the
//! remaining "replicate shape" across sets without touching tensor data.

use candle_core::Tensor;

use crate::error::{ensure_or, Result};

/// Index of the replicate axis for dense replicate sets.
pub const REPLICATE_AXIS: usize = 0;

/// Shape of a single replicate: every axis of a set tensor except the replicate axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicateShape {
    dims: Vec<usize>,
}

impl ReplicateShape {
    /// Extracts the replicate shape of a set tensor, rejecting scalars and empty sets.
    pub fn of(set: &Tensor) -> Result<Self> {
        let dims = set.dims();
        ensure_or!(
            !dims.is_empty(),
            shape_mismatch,
            "replicate set must have a replicate axis, got a scalar"
        );
        ensure_or!(
            dims[REPLICATE_AXIS] > 0,
            dimension_mismatch,
            "replicate set must contain at least one replicate, got shape {:?}",
            dims
        );
        Ok(Self {
            dims: dims[REPLICATE_AXIS + 1..].to_vec(),
        })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of scalar features carried by one replicate.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Fails with a shape mismatch naming `what` when `other` differs.
    pub fn ensure_same(&self, other: &ReplicateShape, what: &str) -> Result<()> {
        ensure_or!(
            self.dims == other.dims,
            shape_mismatch,
            "{what}: replicate shape {:?} does not match {:?}",
            other.dims,
            self.dims
        );
        Ok(())
    }
}

/// Number of replicates stored in a dense set tensor.
pub fn replicate_count(set: &Tensor) -> usize {
    set.dims().first().copied().unwrap_or(0)
}

/// Adds a leading replicate axis to a lone replicate, `(d1, ..., dk)` to `(1, d1, ..., dk)`.
pub fn promote_replicate(replicate: &Tensor) -> Result<Tensor> {
    ensure_or!(
        replicate.rank() > 0,
        shape_mismatch,
        "a lone replicate needs at least a feature axis, got a scalar"
    );
    Ok(replicate.unsqueeze(REPLICATE_AXIS)?)
}

/// Flattens a tensor with `rows` leading entries into a `(rows, width)` matrix.
pub(crate) fn as_rows(tensor: &Tensor, rows: usize) -> candle_core::Result<Tensor> {
    let width = if rows == 0 {
        0
    } else {
        tensor.elem_count() / rows
    };
    tensor.reshape((rows, width))
}
