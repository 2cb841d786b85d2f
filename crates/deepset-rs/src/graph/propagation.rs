//! Graph propagation seam and a reference message-passing layer.

use candle_core::{Module, Tensor};
use candle_nn::{Linear, VarBuilder};

use super::pooling::{neighbour_sum, pool_components, Pooling};
use super::replicate_graph::ReplicateGraph;
use crate::error::{ensure_or, Result};

/// Opaque replicate-to-feature transform for graph-structured replicates.
///
/// Implementations run message passing over `graph` and pool to one feature vector per
/// replicate, either as `(replicates, f)` or with an explicit replicate axis (see
/// [`super::PooledFeatures`]).
pub trait GraphPropagation: Send + Sync {
    fn propagate(&self, graph: &ReplicateGraph) -> Result<Tensor>;
}

impl<F> GraphPropagation for F
where
    F: Fn(&ReplicateGraph) -> Result<Tensor> + Send + Sync,
{
    fn propagate(&self, graph: &ReplicateGraph) -> Result<Tensor> {
        self(graph)
    }
}

/// One round of sum-neighbour message passing followed by pooling:
/// `h_i = relu(x_i W_self + sum_{j -> i} x_j W_neigh)`.
///
/// Works on both topology kinds; shared-topology graphs keep their replicate axis throughout.
#[derive(Debug, Clone)]
pub struct NeighbourhoodConv {
    self_proj: Linear,
    neighbour_proj: Linear,
    pooling: Pooling,
    in_dim: usize,
}

impl NeighbourhoodConv {
    pub fn new(in_dim: usize, out_dim: usize, pooling: Pooling, vb: VarBuilder) -> Result<Self> {
        ensure_or!(
            in_dim > 0 && out_dim > 0,
            configuration,
            "graph convolution widths must be positive, got {in_dim} -> {out_dim}"
        );
        let self_proj = candle_nn::linear(in_dim, out_dim, vb.pp("self"))?;
        let neighbour_proj = candle_nn::linear_no_bias(in_dim, out_dim, vb.pp("neighbour"))?;
        Ok(Self {
            self_proj,
            neighbour_proj,
            pooling,
            in_dim,
        })
    }

    /// Builds the layer from explicit weights, `(out, in)` as stored by [`Linear`].
    pub fn from_weights(
        self_weight: Tensor,
        self_bias: Option<Tensor>,
        neighbour_weight: Tensor,
        pooling: Pooling,
    ) -> Result<Self> {
        let dims = self_weight.dims().to_vec();
        ensure_or!(
            dims.len() == 2 && neighbour_weight.dims() == dims.as_slice(),
            configuration,
            "graph convolution weights must share one (out, in) shape, got {:?} and {:?}",
            dims,
            neighbour_weight.dims()
        );
        Ok(Self {
            self_proj: Linear::new(self_weight, self_bias),
            neighbour_proj: Linear::new(neighbour_weight, None),
            pooling,
            in_dim: dims[1],
        })
    }

    /// Node-level features after message passing, laid out like the input node features.
    pub fn node_embeddings(&self, graph: &ReplicateGraph) -> Result<Tensor> {
        ensure_or!(
            graph.feature_dim() == self.in_dim,
            shape_mismatch,
            "graph convolution expects node features of width {}, got {}",
            self.in_dim,
            graph.feature_dim()
        );
        let x = graph.node_features();
        let messages = neighbour_sum(x, graph.edges(), graph.node_axis())?;
        let h = (self.self_proj.forward(x)? + self.neighbour_proj.forward(&messages)?)?;
        Ok(h.relu()?)
    }
}

impl GraphPropagation for NeighbourhoodConv {
    fn propagate(&self, graph: &ReplicateGraph) -> Result<Tensor> {
        let _span = tracing::trace_span!("NeighbourhoodConv::propagate").entered();
        let h = self.node_embeddings(graph)?;
        pool_components(graph, &h, self.pooling)
    }
}
