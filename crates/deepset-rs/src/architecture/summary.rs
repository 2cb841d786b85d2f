//! Per-set summary computation: inner transform, aggregation, and expert fusion.
//!
//! Dense collections are batched so the inner transform runs once; graph collections are merged
//! into one super-graph so propagation runs once. In both cases aggregation is applied to each
//! set's own rows of the *transformed* tensor. Single sets skip batching entirely.

use std::fmt;
use std::sync::Arc;

use candle_core::{DType, Module, Tensor};
use tracing::{debug_span, trace};

use crate::aggregate::Aggregation;
use crate::batch::{self, aggregate_groups};
use crate::error::{ensure_or, DeepSetError, Result};
use crate::expert::ExpertStatistic;
use crate::graph::{merge_and_count, GraphPropagation, PooledFeatures, ReplicateGraph};
use crate::input::ReplicateSetRef;
use crate::shape::{as_rows, ReplicateShape, REPLICATE_AXIS};

/// The learned replicate-to-feature transform.
#[derive(Clone)]
pub enum InnerTransform {
    /// Applied to dense set tensors of shape `(replicates, ...)`.
    Dense(Arc<dyn Module + Send + Sync>),
    /// Propagation and pooling over graph replicates.
    Graph(Arc<dyn GraphPropagation>),
}

impl InnerTransform {
    pub fn dense<M: Module + Send + Sync + 'static>(module: M) -> Self {
        InnerTransform::Dense(Arc::new(module))
    }

    pub fn graph<G: GraphPropagation + 'static>(propagation: G) -> Self {
        InnerTransform::Graph(Arc::new(propagation))
    }

    fn kind(&self) -> &'static str {
        match self {
            InnerTransform::Dense(_) => "dense",
            InnerTransform::Graph(_) => "graph",
        }
    }
}

impl fmt::Debug for InnerTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InnerTransform::Dense(_) => f.write_str("InnerTransform::Dense"),
            InnerTransform::Graph(_) => f.write_str("InnerTransform::Graph"),
        }
    }
}

/// Borrowed view of the replicate data of one call, covariates already removed.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SetsView<'a> {
    Set(&'a Tensor),
    Collection(&'a [Tensor]),
    Graph(&'a ReplicateGraph),
    GraphCollection(&'a [ReplicateGraph]),
}

impl<'a> SetsView<'a> {
    pub(crate) fn num_sets(&self) -> usize {
        match self {
            SetsView::Set(_) | SetsView::Graph(_) => 1,
            SetsView::Collection(sets) => sets.len(),
            SetsView::GraphCollection(graphs) => graphs.len(),
        }
    }

    fn is_graph(&self) -> bool {
        matches!(self, SetsView::Graph(_) | SetsView::GraphCollection(_))
    }

    fn originals(&self) -> Vec<ReplicateSetRef<'a>> {
        match *self {
            SetsView::Set(set) => vec![ReplicateSetRef::Dense(set)],
            SetsView::Collection(sets) => sets.iter().map(ReplicateSetRef::Dense).collect(),
            SetsView::Graph(graph) => vec![ReplicateSetRef::Graph(graph)],
            SetsView::GraphCollection(graphs) => {
                graphs.iter().map(ReplicateSetRef::Graph).collect()
            }
        }
    }

    fn dtype(&self) -> DType {
        match self {
            SetsView::Set(set) => set.dtype(),
            SetsView::Collection(sets) => sets.first().map_or(DType::F32, Tensor::dtype),
            SetsView::Graph(graph) => graph.node_features().dtype(),
            SetsView::GraphCollection(graphs) => graphs
                .first()
                .map_or(DType::F32, |g| g.node_features().dtype()),
        }
    }

    /// Structural checks that must pass before any transform is invoked.
    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            SetsView::Set(set) => ReplicateShape::of(set).map(|_| ()),
            SetsView::Collection(sets) => batch::validate_sets(sets).map(|_| ()),
            SetsView::Graph(_) => Ok(()),
            SetsView::GraphCollection(graphs) => {
                ensure_or!(
                    !graphs.is_empty(),
                    dimension_mismatch,
                    "graph collection must contain at least one graph"
                );
                Ok(())
            }
        }
    }
}

/// Computes the fused `(sets, learned + expert)` summary for one call.
pub struct SummaryComputer<'a> {
    pub inner: Option<&'a InnerTransform>,
    pub learned_width: usize,
    pub aggregation: &'a Aggregation,
    pub expert: Option<&'a ExpertStatistic>,
}

impl<'a> SummaryComputer<'a> {
    pub(crate) fn compute(&self, sets: SetsView<'_>) -> Result<Tensor> {
        let _span = debug_span!("SummaryComputer::compute", sets = sets.num_sets()).entered();
        sets.validate()?;

        let learned = match self.inner {
            Some(inner) => Some(self.learned(inner, sets)?),
            None => None,
        };
        let expert = match self.expert {
            Some(statistic) => {
                let dtype = learned.as_ref().map_or(sets.dtype(), Tensor::dtype);
                Some(statistic.evaluate_all(sets.originals(), dtype)?)
            }
            None => None,
        };

        match (learned, expert) {
            (Some(learned), Some(expert)) => Ok(Tensor::cat(&[&learned, &expert], 1)?),
            (Some(learned), None) => Ok(learned),
            (None, Some(expert)) => Ok(expert),
            (None, None) => Err(DeepSetError::configuration(
                "neither an inner transform nor an expert statistic is configured",
            )),
        }
    }

    fn learned(&self, inner: &InnerTransform, sets: SetsView<'_>) -> Result<Tensor> {
        let rows = match (inner, sets) {
            (InnerTransform::Dense(module), SetsView::Set(set)) => {
                trace!(path = "dense/single", "computing learned summary");
                let features = module.forward(set)?;
                ensure_replicate_rows(&features, batch_rows(set))?;
                self.aggregation.reduce(&features, REPLICATE_AXIS)?
            }
            (InnerTransform::Dense(module), SetsView::Collection(sets)) => {
                trace!(path = "dense/batched", "computing learned summary");
                let (batched, index) = batch::stack(sets)?;
                let features = module.forward(&batched)?;
                ensure_replicate_rows(&features, index.total())?;
                aggregate_groups(&features, &index, self.aggregation)?
            }
            (InnerTransform::Graph(propagation), SetsView::Graph(graph)) => {
                trace!(path = "graph/single", "computing learned summary");
                let pooled = propagation.propagate(graph)?;
                let features = PooledFeatures::normalize(&pooled, graph.num_replicates())?;
                self.aggregation.reduce(&features, REPLICATE_AXIS)?
            }
            (InnerTransform::Graph(propagation), SetsView::GraphCollection(graphs)) => {
                trace!(path = "graph/batched", "computing learned summary");
                let (merged, index) = merge_and_count(graphs)?;
                let pooled = propagation.propagate(&merged)?;
                let features = PooledFeatures::normalize(&pooled, index.total())?;
                aggregate_groups(&features, &index, self.aggregation)?
            }
            (inner, sets) => {
                let input = if sets.is_graph() { "graph" } else { "dense" };
                return Err(DeepSetError::configuration(format!(
                    "{} inner transform cannot consume {input} replicates",
                    inner.kind()
                )));
            }
        };

        let summary = as_rows(&rows, sets.num_sets())?;
        ensure_or!(
            summary.dims()[1] == self.learned_width,
            dimension_mismatch,
            "inner transform produced a summary of width {}, architecture declares {}",
            summary.dims()[1],
            self.learned_width
        );
        Ok(summary)
    }
}

fn batch_rows(set: &Tensor) -> usize {
    set.dims()[REPLICATE_AXIS]
}

fn ensure_replicate_rows(features: &Tensor, expected: usize) -> Result<()> {
    let rows = features.dims().first().copied().unwrap_or(0);
    ensure_or!(
        rows == expected,
        shape_mismatch,
        "inner transform must keep the replicate axis: got {rows} rows for {expected} replicates"
    );
    Ok(())
}
