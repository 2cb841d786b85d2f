//! Permutation-invariant reductions over the replicate axis.
//!
//! An [`Aggregation`] collapses one designated axis of a tensor to size one. The same reduction
//! is used for dense replicate features and for pooled graph features, so it only ever sees
//! tensors and an axis index. Built-in kinds are composed from differentiable substrate ops.

use std::fmt;
use std::sync::Arc;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::{ensure_or, DeepSetError, Result};

/// Signature of a user-supplied reduction: collapse `axis` of the tensor to size one.
pub type ReductionFn = dyn Fn(&Tensor, usize) -> candle_core::Result<Tensor> + Send + Sync;

/// Names of the built-in reductions, as written in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationKind {
    Mean,
    Sum,
    #[serde(alias = "log_sum_exp")]
    LogSumExp,
}

impl AggregationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregationKind::Mean => "mean",
            AggregationKind::Sum => "sum",
            AggregationKind::LogSumExp => "logsumexp",
        }
    }
}

/// User reduction paired with a name for diagnostics.
#[derive(Clone)]
pub struct CustomReduction {
    name: String,
    reduce: Arc<ReductionFn>,
}

impl CustomReduction {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Reduction applied per replicate set.
#[derive(Clone, Default)]
pub enum Aggregation {
    #[default]
    Mean,
    Sum,
    LogSumExp,
    Custom(CustomReduction),
}

impl From<AggregationKind> for Aggregation {
    fn from(kind: AggregationKind) -> Self {
        match kind {
            AggregationKind::Mean => Aggregation::Mean,
            AggregationKind::Sum => Aggregation::Sum,
            AggregationKind::LogSumExp => Aggregation::LogSumExp,
        }
    }
}

impl Aggregation {
    /// Resolves a reduction by name. Unknown names are a configuration error.
    pub fn from_name(name: &str) -> Result<Self> {
        let normalized = name.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "mean" => Ok(Aggregation::Mean),
            "sum" => Ok(Aggregation::Sum),
            "logsumexp" | "log_sum_exp" => Ok(Aggregation::LogSumExp),
            _ => Err(DeepSetError::configuration(format!(
                "unsupported aggregation '{name}', expected one of mean, sum, logsumexp"
            ))),
        }
    }

    /// Wraps a user reduction. `reduce(x, axis)` must leave `axis` with size one.
    pub fn custom<F>(name: impl Into<String>, reduce: F) -> Self
    where
        F: Fn(&Tensor, usize) -> candle_core::Result<Tensor> + Send + Sync + 'static,
    {
        Aggregation::Custom(CustomReduction {
            name: name.into(),
            reduce: Arc::new(reduce),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Aggregation::Mean => AggregationKind::Mean.as_str(),
            Aggregation::Sum => AggregationKind::Sum.as_str(),
            Aggregation::LogSumExp => AggregationKind::LogSumExp.as_str(),
            Aggregation::Custom(custom) => custom.name(),
        }
    }

    /// The built-in kind, if this is not a custom reduction.
    pub fn kind(&self) -> Option<AggregationKind> {
        match self {
            Aggregation::Mean => Some(AggregationKind::Mean),
            Aggregation::Sum => Some(AggregationKind::Sum),
            Aggregation::LogSumExp => Some(AggregationKind::LogSumExp),
            Aggregation::Custom(_) => None,
        }
    }

    /// Collapses `axis` to size one, leaving every other axis untouched.
    pub fn reduce(&self, x: &Tensor, axis: usize) -> Result<Tensor> {
        let dims = x.dims();
        ensure_or!(
            axis < dims.len(),
            shape_mismatch,
            "aggregation axis {axis} out of range for shape {:?}",
            dims
        );
        ensure_or!(
            dims[axis] > 0,
            dimension_mismatch,
            "cannot aggregate over an empty axis {axis} of shape {:?}",
            dims
        );

        let reduced = match self {
            Aggregation::Mean => x.mean_keepdim(axis)?,
            Aggregation::Sum => x.sum_keepdim(axis)?,
            Aggregation::LogSumExp => log_sum_exp_keepdim(x, axis)?,
            Aggregation::Custom(custom) => (custom.reduce)(x, axis)?,
        };

        let mut expected = dims.to_vec();
        expected[axis] = 1;
        ensure_or!(
            reduced.dims() == expected.as_slice(),
            shape_mismatch,
            "aggregation '{}' produced shape {:?}, expected {:?}",
            self.name(),
            reduced.dims(),
            expected
        );
        Ok(reduced)
    }

    /// Like [`Aggregation::reduce`] but drops the collapsed axis.
    pub fn reduce_dropped(&self, x: &Tensor, axis: usize) -> Result<Tensor> {
        Ok(self.reduce(x, axis)?.squeeze(axis)?)
    }
}

impl fmt::Debug for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Custom(custom) => f.debug_tuple("Custom").field(&custom.name).finish(),
            builtin => f.write_str(builtin.name()),
        }
    }
}

/// `max + log(sum(exp(x - max)))` with the shift held constant for the gradient.
///
/// Infinite maxima shift by zero instead, so an all `-inf` slice reduces to `-inf`.
fn log_sum_exp_keepdim(x: &Tensor, axis: usize) -> candle_core::Result<Tensor> {
    let max = x.max_keepdim(axis)?.detach();
    let finite = max.abs()?.lt(f64::INFINITY)?;
    let max = finite.where_cond(&max, &max.zeros_like()?)?;
    let shifted = x.broadcast_sub(&max)?;
    shifted
        .exp()?
        .sum_keepdim(axis)?
        .log()?
        .broadcast_add(&max)
}
