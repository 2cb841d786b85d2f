mod common;

use candle_core::{Device, Tensor};
use deepset_rs::graph::{
    merge_and_count, pool_components, regroup, GraphPropagation, NeighbourhoodConv,
    PooledFeatures, Pooling, ReplicateGraph, Topology,
};
use deepset_rs::DeepSetError;
use rand::rngs::StdRng;

use common::{assert_close, assert_tensors_close, random_tensor, seeded_rng, to_vec};

const FEATURES: usize = 3;
const HIDDEN: usize = 4;

fn ring_edges(nodes: usize) -> Vec<[usize; 2]> {
    (0..nodes)
        .flat_map(|i| {
            let j = (i + 1) % nodes;
            [[i, j], [j, i]]
        })
        .collect()
}

fn shared_graph(rng: &mut StdRng, replicates: usize, nodes: usize) -> ReplicateGraph {
    ReplicateGraph::shared(
        random_tensor(rng, &[replicates, nodes, FEATURES]),
        ring_edges(nodes),
        None,
    )
    .expect("shared graph")
}

fn conv(rng: &mut StdRng, pooling: Pooling) -> NeighbourhoodConv {
    NeighbourhoodConv::from_weights(
        random_tensor(rng, &[HIDDEN, FEATURES]),
        Some(random_tensor(rng, &[HIDDEN])),
        random_tensor(rng, &[HIDDEN, FEATURES]),
        pooling,
    )
    .expect("conv weights")
}

#[test]
fn merge_and_count_records_replicates_per_graph() {
    let mut rng = seeded_rng(42);
    let graphs = vec![shared_graph(&mut rng, 2, 4), shared_graph(&mut rng, 3, 4)];
    let (merged, index) = merge_and_count(&graphs).expect("merge");
    assert_eq!(index.counts(), vec![2, 3]);
    assert_eq!(merged.num_replicates(), 5);
    assert!(merged.is_shared(), "same topology keeps the shared layout");
    assert_eq!(merged.node_features().dims(), &[5, 4, FEATURES]);
}

#[test]
fn merge_falls_back_to_disjoint_union_for_different_topologies() {
    let mut rng = seeded_rng(7);
    let single = ReplicateGraph::single(
        random_tensor(&mut rng, &[3, FEATURES]),
        vec![[0, 1], [1, 2]],
        None,
    )
    .expect("single graph");
    let graphs = vec![shared_graph(&mut rng, 2, 4), single];
    let (merged, index) = merge_and_count(&graphs).expect("merge");

    assert_eq!(index.counts(), vec![2, 1]);
    assert!(!merged.is_shared());
    assert_eq!(merged.num_nodes(), 2 * 4 + 3);
    assert_eq!(merged.num_replicates(), 3);
    let component = merged.component().expect("disjoint components");
    assert_eq!(&component[..8], &[0, 0, 0, 0, 1, 1, 1, 1]);
    assert_eq!(&component[8..], &[2, 2, 2]);
    assert!(merged.edges().contains(&[8, 9]), "edges are offset by preceding nodes");
}

#[test]
fn shared_and_expanded_layouts_propagate_identically() {
    let mut rng = seeded_rng(11);
    let graph = shared_graph(&mut rng, 3, 5);
    let expanded = graph.expand_replicates().expect("expand");
    assert!(matches!(
        expanded.topology(),
        Topology::Disjoint { num_components: 3, .. }
    ));

    for pooling in [Pooling::Mean, Pooling::Sum, Pooling::Max] {
        let layer = conv(&mut rng, pooling);
        let shared_out = layer.propagate(&graph).expect("shared propagate");
        assert_eq!(shared_out.dims(), &[3, 1, HIDDEN]);
        let expanded_out = layer.propagate(&expanded).expect("expanded propagate");
        assert_eq!(expanded_out.dims(), &[3, HIDDEN]);

        let shared_rows = PooledFeatures::normalize(&shared_out, 3).expect("normalize");
        assert_tensors_close(&expanded_out, &shared_rows);
    }
}

#[test]
fn normalize_accepts_every_replicate_layout() {
    let mut rng = seeded_rng(5);
    let rows = random_tensor(&mut rng, &[4, 2]);
    let leading = rows.unsqueeze(1).expect("(r, 1, f)");
    let batched = rows.unsqueeze(0).expect("(1, r, f)");

    for pooled in [&rows, &leading, &batched] {
        let normalized = PooledFeatures::normalize(pooled, 4).expect("normalize");
        assert_tensors_close(&rows, &normalized);
    }

    let ambiguous = random_tensor(&mut rng, &[2, 2, 2]);
    let err = PooledFeatures::normalize(&ambiguous, 4).expect_err("no singleton axis");
    assert!(matches!(err, DeepSetError::ShapeMismatch(_)), "{err}");

    let err = PooledFeatures::normalize(&rows, 3).expect_err("row count differs");
    assert!(matches!(err, DeepSetError::ShapeMismatch(_)), "{err}");
}

#[test]
fn regroup_partitions_pooled_rows_per_graph() {
    let mut rng = seeded_rng(3);
    let graphs = vec![shared_graph(&mut rng, 2, 3), shared_graph(&mut rng, 4, 3)];
    let (merged, index) = merge_and_count(&graphs).expect("merge");
    let layer = conv(&mut rng, Pooling::Mean);
    let pooled = layer.propagate(&merged).expect("propagate merged");

    let parts = regroup(&pooled, &index).expect("regroup");
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].dims(), &[2, HIDDEN]);
    assert_eq!(parts[1].dims(), &[4, HIDDEN]);

    for (graph, part) in graphs.iter().zip(parts.iter()) {
        let alone = layer.propagate(graph).expect("propagate alone");
        let alone = PooledFeatures::normalize(&alone, graph.num_replicates()).expect("rows");
        assert_tensors_close(&alone, part);
    }
}

#[test]
fn mismatched_node_feature_width_is_rejected() {
    let mut rng = seeded_rng(9);
    let narrow = ReplicateGraph::shared(random_tensor(&mut rng, &[2, 3, 2]), vec![], None)
        .expect("narrow graph");
    let graphs = vec![shared_graph(&mut rng, 2, 3), narrow];
    let err = merge_and_count(&graphs).expect_err("feature widths differ");
    assert!(matches!(err, DeepSetError::ShapeMismatch(_)), "{err}");
}

#[test]
fn disjoint_graph_rejects_cross_component_edges() {
    let mut rng = seeded_rng(1);
    let features = random_tensor(&mut rng, &[4, FEATURES]);
    let err = ReplicateGraph::disjoint(features, vec![[1, 2]], vec![0, 0, 1, 1], None)
        .expect_err("edge joins two replicates");
    assert!(matches!(err, DeepSetError::ShapeMismatch(_)), "{err}");
}

#[test]
fn shared_edge_features_are_repeated_when_expanded() {
    let mut rng = seeded_rng(2);
    let edges = ring_edges(3);
    let edge_features = random_tensor(&mut rng, &[edges.len(), 2]);
    let graph = ReplicateGraph::shared(
        random_tensor(&mut rng, &[2, 3, FEATURES]),
        edges.clone(),
        Some(edge_features),
    )
    .expect("shared graph with edge features");

    let expanded = graph.expand_replicates().expect("expand");
    assert_eq!(expanded.edges().len(), 2 * edges.len());
    assert_eq!(expanded.edge_feature_dim(), Some(2));
    assert_eq!(
        expanded.edge_features().expect("edge features").dims(),
        &[2 * edges.len(), 2]
    );
}

#[test]
fn disjoint_pooling_matches_hand_computation() {
    let features = Tensor::new(
        &[[1.0f32, 2.0], [3.0, 4.0], [10.0, -1.0], [0.0, 5.0], [2.0, 2.0]],
        &Device::Cpu,
    )
    .expect("node features");
    let graph = ReplicateGraph::disjoint(features.clone(), vec![], vec![0, 0, 1, 1, 1], None)
        .expect("two components");

    let mean = pool_components(&graph, &features, Pooling::Mean).expect("mean pool");
    assert_close(&[2.0, 3.0, 4.0, 2.0], &to_vec(&mean));
    let sum = pool_components(&graph, &features, Pooling::Sum).expect("sum pool");
    assert_close(&[4.0, 6.0, 12.0, 6.0], &to_vec(&sum));
    let max = pool_components(&graph, &features, Pooling::Max).expect("max pool");
    assert_close(&[3.0, 4.0, 10.0, 5.0], &to_vec(&max));
}

#[test]
fn neighbourhood_conv_uses_incoming_edges() {
    let eye = Tensor::new(&[[1.0f32, 0.0], [0.0, 1.0]], &Device::Cpu).expect("identity");
    let layer = NeighbourhoodConv::from_weights(eye.clone(), None, eye, Pooling::Sum)
        .expect("identity conv");
    let features = Tensor::new(&[[1.0f32, 2.0], [3.0, 4.0]], &Device::Cpu).expect("nodes");
    let graph = ReplicateGraph::single(features, vec![[0, 1]], None).expect("single edge");

    let h = layer.node_embeddings(&graph).expect("embeddings");
    // node 1 receives node 0's features
    assert_close(&[1.0, 2.0, 4.0, 6.0], &to_vec(&h));
}
