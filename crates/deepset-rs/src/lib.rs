//! Permutation-invariant summary networks over sets of exchangeable replicates.
//!
//! A [`DeepSet`] maps every replicate through an inner transform, aggregates along the replicate
//! axis, appends optional expert statistics and covariates, and applies an outer map. Dense sets
//! and graph-structured replicates are both supported, one at a time or batched.

pub mod aggregate;
pub mod architecture;
pub mod batch;
pub mod config;
pub mod error;
pub mod expert;
pub mod graph;
pub mod input;
pub mod nn;
pub mod shape;

pub use aggregate::{Aggregation, AggregationKind};
pub use architecture::{DeepSet, DeepSetBuilder, InnerTransform, OuterMap, SummaryComputer};
pub use batch::{aggregate_groups, split, stack, GroupingIndex};
pub use config::DeepSetConfig;
pub use error::{DeepSetError, Result};
pub use expert::{ExpertStatistic, Parallel};
pub use graph::{GraphPropagation, ReplicateGraph};
pub use input::{Covariates, ReplicateSetRef, SetInput};
