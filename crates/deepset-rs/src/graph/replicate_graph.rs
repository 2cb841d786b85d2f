use candle_core::{Device, Tensor};

use crate::error::{ensure_or, DeepSetError, Result};

/// How the nodes of a [`ReplicateGraph`] map onto replicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// `node_features` is `(num_nodes, f)`; `component[n]` names the replicate node `n` belongs
    /// to. Components never share an edge.
    Disjoint {
        component: Vec<usize>,
        num_components: usize,
    },
    /// `node_features` is `(replicates, num_nodes, f)`; every replicate uses the same edges.
    Shared,
}

/// Graph-structured replicates: one or more graphs with node (and optional edge) features.
#[derive(Debug, Clone)]
pub struct ReplicateGraph {
    node_features: Tensor,
    edges: Vec<[usize; 2]>,
    edge_features: Option<Tensor>,
    topology: Topology,
}

impl ReplicateGraph {
    /// A single replicate: `(num_nodes, f)` node features and `source -> target` edges.
    pub fn single(
        node_features: Tensor,
        edges: Vec<[usize; 2]>,
        edge_features: Option<Tensor>,
    ) -> Result<Self> {
        let num_nodes = node_rows(&node_features, 2)?;
        Self::disjoint(node_features, edges, vec![0; num_nodes], edge_features)
    }

    /// Several replicates stored as disjoint components of one graph.
    ///
    /// Component ids must be dense (`0..num_components`), every component must own at least one
    /// node, and no edge may connect two components.
    pub fn disjoint(
        node_features: Tensor,
        edges: Vec<[usize; 2]>,
        component: Vec<usize>,
        edge_features: Option<Tensor>,
    ) -> Result<Self> {
        let num_nodes = node_rows(&node_features, 2)?;
        ensure_or!(
            component.len() == num_nodes,
            shape_mismatch,
            "component assignment covers {} nodes, graph has {num_nodes}",
            component.len()
        );
        let num_components = component.iter().max().map_or(0, |max| max + 1);
        let mut sizes = vec![0usize; num_components];
        for &c in &component {
            sizes[c] += 1;
        }
        if let Some(empty) = sizes.iter().position(|&size| size == 0) {
            return Err(DeepSetError::shape_mismatch(format!(
                "component {empty} owns no nodes; component ids must be dense"
            )));
        }
        validate_edges(&edges, num_nodes)?;
        for &[src, dst] in &edges {
            ensure_or!(
                component[src] == component[dst],
                shape_mismatch,
                "edge {src} -> {dst} connects components {} and {}",
                component[src],
                component[dst]
            );
        }
        validate_edge_features(edge_features.as_ref(), edges.len())?;
        Ok(Self {
            node_features,
            edges,
            edge_features,
            topology: Topology::Disjoint {
                component,
                num_components,
            },
        })
    }

    /// Replicates sharing one topology: `(replicates, num_nodes, f)` node features.
    ///
    /// Edge features, if any, are `(num_edges, e)` and shared by every replicate.
    pub fn shared(
        node_features: Tensor,
        edges: Vec<[usize; 2]>,
        edge_features: Option<Tensor>,
    ) -> Result<Self> {
        let dims = node_features.dims();
        ensure_or!(
            dims.len() == 3,
            shape_mismatch,
            "shared-topology node features must be (replicates, nodes, features), got {:?}",
            dims
        );
        ensure_or!(
            dims[0] > 0 && dims[1] > 0,
            dimension_mismatch,
            "shared-topology graph needs at least one replicate and one node, got {:?}",
            dims
        );
        validate_edges(&edges, dims[1])?;
        validate_edge_features(edge_features.as_ref(), edges.len())?;
        Ok(Self {
            node_features,
            edges,
            edge_features,
            topology: Topology::Shared,
        })
    }

    pub fn node_features(&self) -> &Tensor {
        &self.node_features
    }

    pub fn edges(&self) -> &[[usize; 2]] {
        &self.edges
    }

    pub fn edge_features(&self) -> Option<&Tensor> {
        self.edge_features.as_ref()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.topology, Topology::Shared)
    }

    pub fn device(&self) -> &Device {
        self.node_features.device()
    }

    /// Axis of `node_features` that indexes nodes.
    pub fn node_axis(&self) -> usize {
        match self.topology {
            Topology::Disjoint { .. } => 0,
            Topology::Shared => 1,
        }
    }

    /// Number of nodes in one replicate (shared) or in the whole graph (disjoint).
    pub fn num_nodes(&self) -> usize {
        self.node_features.dims()[self.node_axis()]
    }

    /// Width of the node feature vectors.
    pub fn feature_dim(&self) -> usize {
        let dims = self.node_features.dims();
        dims[dims.len() - 1]
    }

    pub fn edge_feature_dim(&self) -> Option<usize> {
        self.edge_features.as_ref().map(|t| t.dims()[1])
    }

    /// Number of replicates the graph represents.
    pub fn num_replicates(&self) -> usize {
        match &self.topology {
            Topology::Disjoint { num_components, .. } => *num_components,
            Topology::Shared => self.node_features.dims()[0],
        }
    }

    /// Component id per node; `None` for shared-topology graphs.
    pub fn component(&self) -> Option<&[usize]> {
        match &self.topology {
            Topology::Disjoint { component, .. } => Some(component),
            Topology::Shared => None,
        }
    }

    /// Rewrites a shared-topology graph as disjoint components, one per replicate, preserving
    /// replicate order. Disjoint graphs are returned unchanged.
    pub fn expand_replicates(&self) -> Result<ReplicateGraph> {
        if !self.is_shared() {
            return Ok(self.clone());
        }
        let replicates = self.num_replicates();
        let nodes = self.num_nodes();
        let features = self.feature_dim();
        let node_features = self
            .node_features
            .reshape((replicates * nodes, features))?;

        let mut edges = Vec::with_capacity(self.edges.len() * replicates);
        let mut component = Vec::with_capacity(replicates * nodes);
        for r in 0..replicates {
            let offset = r * nodes;
            edges.extend(
                self.edges
                    .iter()
                    .map(|&[src, dst]| [src + offset, dst + offset]),
            );
            component.extend(std::iter::repeat(r).take(nodes));
        }
        let edge_features = match &self.edge_features {
            Some(shared) => {
                let copies = vec![shared.clone(); replicates];
                Some(Tensor::cat(&copies, 0)?)
            }
            None => None,
        };

        Ok(ReplicateGraph {
            node_features,
            edges,
            edge_features,
            topology: Topology::Disjoint {
                component,
                num_components: replicates,
            },
        })
    }
}

fn node_rows(node_features: &Tensor, rank: usize) -> Result<usize> {
    let dims = node_features.dims();
    ensure_or!(
        dims.len() == rank,
        shape_mismatch,
        "node features must have rank {rank}, got shape {:?}",
        dims
    );
    ensure_or!(
        dims[0] > 0,
        dimension_mismatch,
        "graph must contain at least one node"
    );
    Ok(dims[0])
}

fn validate_edges(edges: &[[usize; 2]], num_nodes: usize) -> Result<()> {
    for &[src, dst] in edges {
        ensure_or!(
            src < num_nodes && dst < num_nodes,
            shape_mismatch,
            "edge {src} -> {dst} references a node outside 0..{num_nodes}"
        );
    }
    Ok(())
}

fn validate_edge_features(edge_features: Option<&Tensor>, num_edges: usize) -> Result<()> {
    if let Some(features) = edge_features {
        let dims = features.dims();
        ensure_or!(
            dims.len() == 2 && dims[0] == num_edges,
            shape_mismatch,
            "edge features must be ({num_edges}, e), got {:?}",
            dims
        );
    }
    Ok(())
}
