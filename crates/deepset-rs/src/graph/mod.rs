//! Graph-structured replicates.
//!
//! Graphs are merged into one super-graph per forward pass ([`merge_and_count`]), handed to an
//! opaque [`GraphPropagation`], and the pooled output is split back per set ([`regroup`]).
//! Pooled output is normalised to `(replicates, features)` at this boundary so the aggregation
//! stage never sees the propagation's layout.

pub mod grouping;
pub mod pooling;
pub mod propagation;
mod replicate_graph;

pub use grouping::{disjoint_union, merge_and_count, regroup, PooledFeatures};
pub use pooling::{pool_components, Pooling};
pub use propagation::{GraphPropagation, NeighbourhoodConv};
pub use replicate_graph::{ReplicateGraph, Topology};
