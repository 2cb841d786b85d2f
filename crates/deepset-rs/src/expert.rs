//! Deterministic, non-learned statistics of a replicate set.
//!
//! Expert statistics see the original (untransformed) set and are detached from the gradient
//! graph. [`Parallel`] composes several statistics by applying them in order and concatenating
//! their outputs.

use std::fmt;
use std::sync::Arc;

use candle_core::{DType, Tensor};

use crate::error::{ensure_or, DeepSetError, Result};
use crate::input::ReplicateSetRef;

/// Signature of an expert statistic: one set in, a vector of fixed width out.
pub type StatisticFn = dyn Fn(ReplicateSetRef<'_>) -> Result<Tensor> + Send + Sync;

#[derive(Clone)]
pub struct ExpertStatistic {
    name: String,
    width: usize,
    compute: Arc<StatisticFn>,
}

impl ExpertStatistic {
    /// Wraps a user statistic producing `width` values per set.
    pub fn from_fn<F>(name: impl Into<String>, width: usize, compute: F) -> Self
    where
        F: Fn(ReplicateSetRef<'_>) -> Result<Tensor> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            width,
            compute: Arc::new(compute),
        }
    }

    /// The replicate count `m`.
    pub fn sample_size() -> Self {
        Self::from_count("sample_size", |m| m)
    }

    /// `ln m`.
    pub fn log_sample_size() -> Self {
        Self::from_count("log_sample_size", f64::ln)
    }

    /// `1 / sqrt(m)`.
    pub fn inverse_sqrt_sample_size() -> Self {
        Self::from_count("inverse_sqrt_sample_size", |m| 1.0 / m.sqrt())
    }

    /// Resolves a built-in statistic by name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sample_size" | "samplesize" => Ok(Self::sample_size()),
            "log_sample_size" | "logsamplesize" => Ok(Self::log_sample_size()),
            "inverse_sqrt_sample_size" | "invsqrtsamplesize" => {
                Ok(Self::inverse_sqrt_sample_size())
            }
            _ => Err(DeepSetError::configuration(format!(
                "unknown expert statistic '{name}'"
            ))),
        }
    }

    fn from_count(name: &str, f: fn(f64) -> f64) -> Self {
        Self::from_fn(name, 1, move |set| {
            let value = f(set.num_replicates() as f64) as f32;
            Ok(Tensor::from_vec(vec![value], 1, set.device())?)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Evaluates the statistic on one set and returns a detached `(1, width)` row.
    pub fn evaluate(&self, set: ReplicateSetRef<'_>) -> Result<Tensor> {
        let values = (self.compute)(set)?;
        ensure_or!(
            values.elem_count() == self.width,
            dimension_mismatch,
            "expert statistic '{}' produced {} values, declared width is {}",
            self.name,
            values.elem_count(),
            self.width
        );
        Ok(values.detach().reshape((1, self.width))?)
    }

    /// Evaluates the statistic on every set and stacks the rows, `(sets, width)`.
    pub fn evaluate_all<'a>(
        &self,
        sets: impl IntoIterator<Item = ReplicateSetRef<'a>>,
        dtype: DType,
    ) -> Result<Tensor> {
        let rows = sets
            .into_iter()
            .map(|set| Ok(self.evaluate(set)?.to_dtype(dtype)?))
            .collect::<Result<Vec<_>>>()?;
        ensure_or!(
            !rows.is_empty(),
            dimension_mismatch,
            "expert statistic '{}' evaluated on an empty collection",
            self.name
        );
        Ok(Tensor::cat(&rows, 0)?)
    }
}

impl fmt::Debug for ExpertStatistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpertStatistic")
            .field("name", &self.name)
            .field("width", &self.width)
            .finish()
    }
}

/// Ordered application of several statistics with their results concatenated.
#[derive(Debug, Clone)]
pub struct Parallel {
    statistics: Vec<ExpertStatistic>,
}

impl Parallel {
    pub fn new(statistics: Vec<ExpertStatistic>) -> Result<Self> {
        ensure_or!(
            !statistics.is_empty(),
            configuration,
            "parallel composition needs at least one statistic"
        );
        Ok(Self { statistics })
    }

    pub fn width(&self) -> usize {
        self.statistics.iter().map(ExpertStatistic::width).sum()
    }

    pub fn statistics(&self) -> &[ExpertStatistic] {
        &self.statistics
    }

    /// Applies every statistic in order and concatenates the outputs into one vector.
    pub fn evaluate(&self, set: ReplicateSetRef<'_>) -> Result<Tensor> {
        let parts = self
            .statistics
            .iter()
            .map(|statistic| statistic.evaluate(set))
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::cat(&parts, 1)?.squeeze(0)?)
    }
}

impl From<Parallel> for ExpertStatistic {
    fn from(parallel: Parallel) -> Self {
        let name = parallel
            .statistics
            .iter()
            .map(ExpertStatistic::name)
            .collect::<Vec<_>>()
            .join("+");
        let width = parallel.width();
        ExpertStatistic::from_fn(name, width, move |set| parallel.evaluate(set))
    }
}
