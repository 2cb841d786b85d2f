//! Readout of node features into one vector per replicate.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use super::replicate_graph::{ReplicateGraph, Topology};
use crate::error::{ensure_or, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    #[default]
    Mean,
    Sum,
    Max,
}

/// Pools node-level `features` laid out like `graph.node_features()`.
///
/// Disjoint graphs yield `(components, f)`. Shared-topology graphs reduce the node axis in place
/// and yield `(replicates, 1, f)`; [`super::PooledFeatures::normalize`] reconciles the two.
pub fn pool_components(
    graph: &ReplicateGraph,
    features: &Tensor,
    pooling: Pooling,
) -> Result<Tensor> {
    let node_axis = graph.node_axis();
    let dims = features.dims();
    ensure_or!(
        dims.len() == graph.node_features().rank()
            && dims[..=node_axis] == graph.node_features().dims()[..=node_axis],
        shape_mismatch,
        "node features {:?} do not match the graph layout {:?}",
        dims,
        graph.node_features().dims()
    );

    match graph.topology() {
        Topology::Shared => Ok(match pooling {
            Pooling::Mean => features.mean_keepdim(node_axis)?,
            Pooling::Sum => features.sum_keepdim(node_axis)?,
            Pooling::Max => features.max_keepdim(node_axis)?,
        }),
        Topology::Disjoint {
            component,
            num_components,
        } => pool_disjoint(features, component, *num_components, pooling),
    }
}

fn pool_disjoint(
    features: &Tensor,
    component: &[usize],
    num_components: usize,
    pooling: Pooling,
) -> Result<Tensor> {
    let device = features.device();
    let width = features.dims()[1];
    match pooling {
        Pooling::Sum | Pooling::Mean => {
            let ids: Vec<u32> = component.iter().map(|&c| c as u32).collect();
            let ids = Tensor::from_vec(ids, component.len(), device)?;
            let sums = Tensor::zeros((num_components, width), features.dtype(), device)?
                .index_add(&ids, features, 0)?;
            if pooling == Pooling::Sum {
                return Ok(sums);
            }
            let mut sizes = vec![0f32; num_components];
            for &c in component {
                sizes[c] += 1.0;
            }
            let sizes = Tensor::from_vec(sizes, (num_components, 1), device)?
                .to_dtype(features.dtype())?;
            Ok(sums.broadcast_div(&sizes)?)
        }
        Pooling::Max => {
            let mut members: Vec<Vec<u32>> = vec![Vec::new(); num_components];
            for (node, &c) in component.iter().enumerate() {
                members[c].push(node as u32);
            }
            let pooled = members
                .into_iter()
                .map(|nodes| {
                    let len = nodes.len();
                    let ids = Tensor::from_vec(nodes, len, device)?;
                    features.index_select(&ids, 0)?.max_keepdim(0)
                })
                .collect::<candle_core::Result<Vec<_>>>()?;
            Ok(Tensor::cat(&pooled, 0)?)
        }
    }
}

/// Sums each node's incoming neighbour features along `node_axis`.
pub(crate) fn neighbour_sum(
    features: &Tensor,
    edges: &[[usize; 2]],
    node_axis: usize,
) -> candle_core::Result<Tensor> {
    if edges.is_empty() {
        return features.zeros_like();
    }
    let device = features.device();
    let sources: Vec<u32> = edges.iter().map(|&[src, _]| src as u32).collect();
    let targets: Vec<u32> = edges.iter().map(|&[_, dst]| dst as u32).collect();
    let sources = Tensor::from_vec(sources, edges.len(), device)?;
    let targets = Tensor::from_vec(targets, edges.len(), device)?;
    let messages = features.index_select(&sources, node_axis)?;
    features
        .zeros_like()?
        .index_add(&targets, &messages, node_axis)
}
