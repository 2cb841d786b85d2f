//! The closed set of input shapes a summary network accepts.

use candle_core::{Device, Tensor};

use crate::error::{ensure_or, DeepSetError, Result};
use crate::graph::ReplicateGraph;
use crate::shape::replicate_count;

/// Input to [`crate::DeepSet::forward`].
///
/// Dense sets store replicates along axis 0. `Replicate`, `Set` and `Graph` yield one output
/// row; the collections yield one row per set.
#[derive(Debug, Clone)]
pub enum SetInput {
    /// One replicate on its own, feature axis last; treated as a set of size one.
    Replicate(Tensor),
    /// One dense replicate set.
    Set(Tensor),
    /// Independent dense sets; replicate counts may differ.
    Collection(Vec<Tensor>),
    /// One graph replicate set.
    Graph(ReplicateGraph),
    /// Independent graph replicate sets.
    GraphCollection(Vec<ReplicateGraph>),
    /// Any of the above paired with set-level covariates.
    WithCovariates {
        sets: Box<SetInput>,
        covariates: Covariates,
    },
}

impl SetInput {
    pub fn with_covariates(self, covariates: Covariates) -> Self {
        SetInput::WithCovariates {
            sets: Box::new(self),
            covariates,
        }
    }

    /// Wraps a lone replicate without a replicate axis.
    pub fn replicate(replicate: Tensor) -> Self {
        SetInput::Replicate(replicate)
    }

    /// Number of sets, i.e. output rows.
    pub fn num_sets(&self) -> usize {
        match self {
            SetInput::Replicate(_) | SetInput::Set(_) | SetInput::Graph(_) => 1,
            SetInput::Collection(sets) => sets.len(),
            SetInput::GraphCollection(graphs) => graphs.len(),
            SetInput::WithCovariates { sets, .. } => sets.num_sets(),
        }
    }

    /// Separates the replicate data from any covariates. Nested covariates are rejected.
    pub(crate) fn into_parts(self) -> Result<(SetInput, Option<Covariates>)> {
        match self {
            SetInput::WithCovariates { sets, covariates } => {
                if matches!(*sets, SetInput::WithCovariates { .. }) {
                    return Err(DeepSetError::dimension_mismatch(
                        "covariates were supplied more than once for the same input",
                    ));
                }
                Ok((*sets, Some(covariates)))
            }
            other => Ok((other, None)),
        }
    }
}

impl From<Tensor> for SetInput {
    fn from(set: Tensor) -> Self {
        SetInput::Set(set)
    }
}

impl From<Vec<Tensor>> for SetInput {
    fn from(sets: Vec<Tensor>) -> Self {
        SetInput::Collection(sets)
    }
}

impl From<ReplicateGraph> for SetInput {
    fn from(graph: ReplicateGraph) -> Self {
        SetInput::Graph(graph)
    }
}

impl From<Vec<ReplicateGraph>> for SetInput {
    fn from(graphs: Vec<ReplicateGraph>) -> Self {
        SetInput::GraphCollection(graphs)
    }
}

impl<S: Into<SetInput>> From<(S, Covariates)> for SetInput {
    fn from((sets, covariates): (S, Covariates)) -> Self {
        sets.into().with_covariates(covariates)
    }
}

/// Borrowed view of one original replicate set, as handed to expert statistics.
#[derive(Debug, Clone, Copy)]
pub enum ReplicateSetRef<'a> {
    Dense(&'a Tensor),
    Graph(&'a ReplicateGraph),
}

impl<'a> ReplicateSetRef<'a> {
    pub fn num_replicates(&self) -> usize {
        match self {
            ReplicateSetRef::Dense(set) => replicate_count(set),
            ReplicateSetRef::Graph(graph) => graph.num_replicates(),
        }
    }

    pub fn device(&self) -> &'a Device {
        match *self {
            ReplicateSetRef::Dense(set) => set.device(),
            ReplicateSetRef::Graph(graph) => graph.device(),
        }
    }
}

/// Set-level information not derived from the data.
#[derive(Debug, Clone)]
pub enum Covariates {
    /// One vector per set. A single vector is broadcast to every set.
    PerSet(Vec<Tensor>),
    /// `(sets, c)` matrix; a `(1, c)` matrix is broadcast to every set.
    Matrix(Tensor),
    /// One vector shared by every set.
    Shared(Tensor),
}

impl Covariates {
    /// Number of covariate vectors supplied, without touching tensor data.
    pub fn count(&self) -> Result<usize> {
        match self {
            Covariates::PerSet(vectors) => Ok(vectors.len()),
            Covariates::Matrix(matrix) => {
                let dims = matrix.dims();
                ensure_or!(
                    dims.len() == 2,
                    dimension_mismatch,
                    "covariate matrix must be (sets, width), got {:?}",
                    dims
                );
                Ok(dims[0])
            }
            Covariates::Shared(_) => Ok(1),
        }
    }

    /// Checks the covariate count and width against the set count, before any tensor op runs.
    ///
    /// Exactly one vector broadcasts to many sets; any other disagreement is an error.
    pub fn validate(&self, num_sets: usize, width: usize) -> Result<()> {
        let count = self.count()?;
        ensure_or!(
            count == num_sets || count == 1,
            dimension_mismatch,
            "got {count} covariate vectors for {num_sets} sets; supply one per set or a single \
             shared vector"
        );
        let widths: Vec<usize> = match self {
            Covariates::PerSet(vectors) => vectors.iter().map(Tensor::elem_count).collect(),
            Covariates::Matrix(matrix) => vec![matrix.dims()[1]],
            Covariates::Shared(vector) => vec![vector.elem_count()],
        };
        for (i, &w) in widths.iter().enumerate() {
            ensure_or!(
                w == width,
                dimension_mismatch,
                "covariate vector {i} has width {w}, architecture expects {width}"
            );
        }
        Ok(())
    }

    /// Materialises a `(num_sets, width)` covariate matrix. Call [`Covariates::validate`] first.
    pub fn to_rows(&self, num_sets: usize, width: usize) -> Result<Tensor> {
        self.validate(num_sets, width)?;
        let rows = match self {
            Covariates::PerSet(vectors) => {
                let rows = vectors
                    .iter()
                    .map(|v| v.reshape((1, width)))
                    .collect::<candle_core::Result<Vec<_>>>()?;
                Tensor::cat(&rows, 0)?
            }
            Covariates::Matrix(matrix) => matrix.clone(),
            Covariates::Shared(vector) => vector.reshape((1, width))?,
        };
        if rows.dims()[0] == num_sets {
            Ok(rows)
        } else {
            Ok(rows.broadcast_as((num_sets, width))?.contiguous()?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn vector(width: usize) -> Tensor {
        Tensor::zeros(width, DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn single_vector_broadcasts() {
        let covariates = Covariates::PerSet(vec![vector(2)]);
        covariates.validate(4, 2).unwrap();
        assert_eq!(covariates.to_rows(4, 2).unwrap().dims(), &[4, 2]);
    }

    #[test]
    fn count_mismatch_is_not_coerced() {
        let covariates = Covariates::PerSet(vec![vector(2), vector(2)]);
        let err = covariates.validate(3, 2).unwrap_err();
        assert!(matches!(err, DeepSetError::DimensionMismatch(_)));
    }

    #[test]
    fn nested_covariates_are_rejected() {
        let input = SetInput::from(vector(3))
            .with_covariates(Covariates::Shared(vector(1)))
            .with_covariates(Covariates::Shared(vector(1)));
        assert_eq!(input.num_sets(), 1);
        assert!(input.into_parts().is_err());
    }
}
