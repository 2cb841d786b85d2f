//! Merging graph replicate sets into one super-graph and splitting pooled output back.
//!
//! A collection of graphs is merged once so the external propagation runs a single forward
//! pass. The returned [`GroupingIndex`] records how many replicates each original set owns,
//! which is all [`regroup`] needs to partition the pooled output per set.

use candle_core::Tensor;
use tracing::{debug_span, trace};

use super::replicate_graph::{ReplicateGraph, Topology};
use crate::batch::{split, GroupingIndex};
use crate::error::{ensure_or, DeepSetError, Result};

/// Canonical pooled-output convention: one row of features per replicate.
pub struct PooledFeatures;

impl PooledFeatures {
    /// Normalises pooled output to `(replicates, f)`.
    ///
    /// Rank-2 `(replicates, f)` passes through. Rank-3 output carrying an explicit replicate
    /// axis, `(replicates, 1, f)` or `(1, replicates, f)`, has its singleton axis dropped.
    pub fn normalize(pooled: &Tensor, replicates: usize) -> Result<Tensor> {
        let dims = pooled.dims();
        let rows = match dims {
            [_, _] => pooled.clone(),
            [r, 1, _] if *r == replicates => pooled.squeeze(1)?,
            [1, r, _] if *r == replicates => pooled.squeeze(0)?,
            _ => {
                return Err(DeepSetError::shape_mismatch(format!(
                    "pooled graph output {:?} is neither (replicates, f) nor a rank-3 layout \
                     with a singleton axis for {replicates} replicates",
                    dims
                )))
            }
        };
        ensure_or!(
            rows.dims()[0] == replicates,
            shape_mismatch,
            "pooled graph output has {} rows, expected one per replicate ({replicates})",
            rows.dims()[0]
        );
        Ok(rows)
    }
}

/// Merges every graph of a collection into one super-graph.
///
/// When all graphs share one topology (same node count and edge list, no edge features) the
/// node features are stacked along the replicate axis and the result stays shared. Otherwise
/// shared graphs are expanded and everything is merged as a disjoint union.
pub fn merge_and_count(graphs: &[ReplicateGraph]) -> Result<(ReplicateGraph, GroupingIndex)> {
    let _span = debug_span!("merge_and_count", graphs = graphs.len()).entered();
    validate_graphs(graphs)?;
    let counts: Vec<usize> = graphs.iter().map(ReplicateGraph::num_replicates).collect();
    let index = GroupingIndex::from_counts(&counts);

    if shares_topology(graphs) {
        trace!(replicates = index.total(), "merging along shared topology");
        let features: Vec<&Tensor> = graphs.iter().map(ReplicateGraph::node_features).collect();
        let merged = ReplicateGraph::shared(
            Tensor::cat(&features, 0)?,
            graphs[0].edges().to_vec(),
            None,
        )?;
        return Ok((merged, index));
    }

    trace!(replicates = index.total(), "merging as disjoint union");
    let expanded = graphs
        .iter()
        .map(ReplicateGraph::expand_replicates)
        .collect::<Result<Vec<_>>>()?;
    Ok((disjoint_union(&expanded)?, index))
}

/// Partitions pooled output back per original set.
pub fn regroup(pooled: &Tensor, index: &GroupingIndex) -> Result<Vec<Tensor>> {
    let rows = PooledFeatures::normalize(pooled, index.total())?;
    split(&rows, index)
}

/// Disjoint union of graphs that are already in disjoint form.
pub fn disjoint_union(graphs: &[ReplicateGraph]) -> Result<ReplicateGraph> {
    validate_graphs(graphs)?;
    let mut edges = Vec::new();
    let mut component = Vec::new();
    let mut node_offset = 0usize;
    let mut component_offset = 0usize;
    for graph in graphs {
        let Topology::Disjoint {
            component: local,
            num_components,
        } = graph.topology()
        else {
            return Err(DeepSetError::shape_mismatch(
                "disjoint union requires graphs in disjoint form; expand shared graphs first",
            ));
        };
        edges.extend(
            graph
                .edges()
                .iter()
                .map(|&[src, dst]| [src + node_offset, dst + node_offset]),
        );
        component.extend(local.iter().map(|c| c + component_offset));
        node_offset += graph.num_nodes();
        component_offset += num_components;
    }

    let features: Vec<&Tensor> = graphs.iter().map(ReplicateGraph::node_features).collect();
    let node_features = Tensor::cat(&features, 0)?;
    let edge_features = match graphs[0].edge_features() {
        Some(_) => {
            let parts: Vec<&Tensor> = graphs
                .iter()
                .filter_map(ReplicateGraph::edge_features)
                .collect();
            Some(Tensor::cat(&parts, 0)?)
        }
        None => None,
    };
    ReplicateGraph::disjoint(node_features, edges, component, edge_features)
}

/// Rejects collections the aggregation stage could not reconcile.
fn validate_graphs(graphs: &[ReplicateGraph]) -> Result<()> {
    ensure_or!(
        !graphs.is_empty(),
        dimension_mismatch,
        "graph collection must contain at least one graph"
    );
    let reference = &graphs[0];
    for (i, graph) in graphs.iter().enumerate().skip(1) {
        ensure_or!(
            graph.feature_dim() == reference.feature_dim(),
            shape_mismatch,
            "graph {i} has node feature width {}, expected {}",
            graph.feature_dim(),
            reference.feature_dim()
        );
        ensure_or!(
            graph.edge_feature_dim() == reference.edge_feature_dim(),
            shape_mismatch,
            "graph {i} has edge feature width {:?}, expected {:?}",
            graph.edge_feature_dim(),
            reference.edge_feature_dim()
        );
        ensure_or!(
            graph.node_features().dtype() == reference.node_features().dtype(),
            shape_mismatch,
            "graph {i} has dtype {:?}, expected {:?}",
            graph.node_features().dtype(),
            reference.node_features().dtype()
        );
    }
    Ok(())
}

fn shares_topology(graphs: &[ReplicateGraph]) -> bool {
    let reference = &graphs[0];
    graphs.iter().all(|graph| {
        graph.is_shared()
            && graph.edge_features().is_none()
            && graph.num_nodes() == reference.num_nodes()
            && graph.edges() == reference.edges()
    })
}
