//! The summary network: inner transform, aggregation, fusion, and outer map.
//!
//! [`DeepSet::forward`] is the single entry point. It matches on the [`SetInput`] variant and
//! delegates to the dense or graph path, single-set or batched. An instance is immutable after
//! construction and holds no per-call state, so it can be shared across threads.

pub mod outer;
pub mod summary;

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;
use tracing::debug_span;

use crate::aggregate::Aggregation;
use crate::config::DeepSetConfig;
use crate::error::{ensure_or, DeepSetError, Result};
use crate::expert::{ExpertStatistic, Parallel};
use crate::graph::GraphPropagation;
use crate::input::{Covariates, SetInput};
use crate::nn::Mlp;
use crate::shape::promote_replicate;

pub use outer::OuterMap;
pub use summary::{InnerTransform, SummaryComputer};

use summary::SetsView;

/// Permutation-invariant summary network over replicate sets.
///
/// Fused feature order per set: learned summary, then expert statistic, then covariates.
#[derive(Debug, Clone)]
pub struct DeepSet {
    inner: Option<InnerTransform>,
    learned_width: usize,
    aggregation: Aggregation,
    expert: Option<ExpertStatistic>,
    covariate_width: usize,
    outer: OuterMap,
}

impl DeepSet {
    pub fn builder() -> DeepSetBuilder {
        DeepSetBuilder::default()
    }

    /// Maps the input to the output space, one row per set.
    pub fn forward(&self, input: impl Into<SetInput>) -> Result<Tensor> {
        let input = input.into();
        let _span = debug_span!("DeepSet::forward", sets = input.num_sets()).entered();
        let features = self.summarize(input)?;
        self.outer.forward(&features)
    }

    /// Fused features before the outer map, `(sets, summary_width())`.
    pub fn summarize(&self, input: impl Into<SetInput>) -> Result<Tensor> {
        let (sets, covariates) = input.into().into_parts()?;
        let num_sets = sets.num_sets();
        self.validate_covariates(covariates.as_ref(), num_sets)?;

        let promoted: Tensor;
        let view = match &sets {
            SetInput::Replicate(replicate) => {
                promoted = promote_replicate(replicate)?;
                SetsView::Set(&promoted)
            }
            SetInput::Set(set) => SetsView::Set(set),
            SetInput::Collection(sets) => SetsView::Collection(sets),
            SetInput::Graph(graph) => SetsView::Graph(graph),
            SetInput::GraphCollection(graphs) => SetsView::GraphCollection(graphs),
            SetInput::WithCovariates { .. } => {
                return Err(DeepSetError::dimension_mismatch(
                    "covariates were supplied more than once for the same input",
                ))
            }
        };
        let summary = self.computer().compute(view)?;

        match covariates {
            Some(covariates) => {
                let rows = covariates
                    .to_rows(num_sets, self.covariate_width)?
                    .to_device(summary.device())?
                    .to_dtype(summary.dtype())?;
                Ok(Tensor::cat(&[&summary, &rows], 1)?)
            }
            None => Ok(summary),
        }
    }

    fn computer(&self) -> SummaryComputer<'_> {
        SummaryComputer {
            inner: self.inner.as_ref(),
            learned_width: self.learned_width,
            aggregation: &self.aggregation,
            expert: self.expert.as_ref(),
        }
    }

    /// Covariate checks run before any tensor operation.
    fn validate_covariates(&self, covariates: Option<&Covariates>, num_sets: usize) -> Result<()> {
        match covariates {
            Some(covariates) => {
                ensure_or!(
                    self.covariate_width > 0,
                    dimension_mismatch,
                    "covariates supplied but the architecture declares no covariate width"
                );
                covariates.validate(num_sets, self.covariate_width)
            }
            None => {
                ensure_or!(
                    self.covariate_width == 0,
                    dimension_mismatch,
                    "architecture expects {} covariates per set but none were supplied",
                    self.covariate_width
                );
                Ok(())
            }
        }
    }

    pub fn aggregation(&self) -> &Aggregation {
        &self.aggregation
    }

    pub fn learned_width(&self) -> usize {
        self.learned_width
    }

    pub fn expert_width(&self) -> usize {
        self.expert.as_ref().map_or(0, ExpertStatistic::width)
    }

    pub fn covariate_width(&self) -> usize {
        self.covariate_width
    }

    /// Width of the fused features fed to the outer map.
    pub fn summary_width(&self) -> usize {
        self.learned_width + self.expert_width() + self.covariate_width
    }

    pub fn output_width(&self) -> usize {
        self.outer.output_width()
    }

    pub fn outer(&self) -> &OuterMap {
        &self.outer
    }
}

/// Collects the architecture configuration and validates it eagerly in [`DeepSetBuilder::build`].
#[derive(Default)]
pub struct DeepSetBuilder {
    inner: Option<(InnerTransform, usize)>,
    aggregation: Aggregation,
    expert: Option<ExpertStatistic>,
    covariate_width: usize,
    outer: Option<OuterMap>,
    declared: Option<DeclaredWidths>,
}

/// Widths fixed by a configuration; transforms supplied later must agree with them.
#[derive(Debug, Clone, Copy)]
struct DeclaredWidths {
    learned: usize,
    outer: Option<(usize, usize)>,
}

impl DeepSetBuilder {
    /// Starts from a configuration: aggregation, expert statistics, and covariate width.
    ///
    /// The learned width and the outer network widths of the config are recorded, and
    /// [`DeepSetBuilder::build`] rejects transforms that disagree with them.
    pub fn from_config(config: &DeepSetConfig) -> Result<Self> {
        let mut builder = DeepSetBuilder {
            aggregation: Aggregation::from(config.aggregation),
            covariate_width: config.covariate_width,
            declared: Some(DeclaredWidths {
                learned: config.learned_width,
                outer: config
                    .outer
                    .as_ref()
                    .map(|outer| (outer.input_width, outer.output_width)),
            }),
            ..DeepSetBuilder::default()
        };
        if !config.expert_statistics.is_empty() {
            let mut statistics = config
                .expert_statistics
                .iter()
                .map(|name| ExpertStatistic::from_name(name))
                .collect::<Result<Vec<_>>>()?;
            builder.expert = Some(if statistics.len() == 1 {
                statistics.remove(0)
            } else {
                Parallel::new(statistics)?.into()
            });
        }
        Ok(builder)
    }

    /// Builds the inner and outer [`Mlp`]s described by `config` from `vb` (`inner` and `outer`
    /// prefixes). The config must describe an outer network; the inner one is optional when
    /// only expert statistics are used.
    pub fn from_config_with_weights(config: &DeepSetConfig, vb: VarBuilder) -> Result<Self> {
        let mut builder = Self::from_config(config)?;
        if let Some(inner) = &config.inner {
            ensure_or!(
                inner.output_width == config.learned_width,
                configuration,
                "inner network output width {} does not match learned width {}",
                inner.output_width,
                config.learned_width
            );
            let mlp = Mlp::new(inner.clone(), vb.pp("inner"))?;
            builder = builder.inner(mlp, config.learned_width);
        }
        let outer = config
            .outer
            .as_ref()
            .ok_or_else(|| {
                DeepSetError::configuration("config does not describe an outer network")
            })?;
        let mlp = Mlp::new(outer.clone(), vb.pp("outer"))?;
        Ok(builder.outer(OuterMap::from_mlp(mlp)?))
    }

    /// Dense inner transform producing `width` summary features per replicate.
    pub fn inner<M>(mut self, module: M, width: usize) -> Self
    where
        M: Module + Send + Sync + 'static,
    {
        self.inner = Some((InnerTransform::dense(module), width));
        self
    }

    /// Graph propagation producing `width` pooled features per replicate.
    pub fn graph_inner<G>(mut self, propagation: G, width: usize) -> Self
    where
        G: GraphPropagation + 'static,
    {
        self.inner = Some((InnerTransform::graph(propagation), width));
        self
    }

    pub fn inner_transform(mut self, inner: InnerTransform, width: usize) -> Self {
        self.inner = Some((inner, width));
        self
    }

    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn expert(mut self, expert: impl Into<ExpertStatistic>) -> Self {
        self.expert = Some(expert.into());
        self
    }

    pub fn covariate_width(mut self, width: usize) -> Self {
        self.covariate_width = width;
        self
    }

    pub fn outer(mut self, outer: OuterMap) -> Self {
        self.outer = Some(outer);
        self
    }

    pub fn build(self) -> Result<DeepSet> {
        if let Some(declared) = self.declared {
            self.check_declared(declared)?;
        }
        ensure_or!(
            self.inner.is_some() || self.expert.is_some(),
            configuration,
            "a summary network needs an inner transform, an expert statistic, or both"
        );
        if let Some((_, width)) = &self.inner {
            ensure_or!(
                *width > 0,
                configuration,
                "inner transform width must be positive"
            );
        }
        if let Some(expert) = &self.expert {
            ensure_or!(
                expert.width() > 0,
                configuration,
                "expert statistic '{}' must produce at least one value",
                expert.name()
            );
        }
        let outer = self
            .outer
            .ok_or_else(|| DeepSetError::configuration("an outer map is required"))?;

        let (inner, learned_width) = match self.inner {
            Some((inner, width)) => (Some(inner), width),
            None => (None, 0),
        };
        let expert_width = self.expert.as_ref().map_or(0, ExpertStatistic::width);
        let fused = learned_width + expert_width + self.covariate_width;
        ensure_or!(
            fused == outer.input_width(),
            configuration,
            "outer map expects input width {}, but learned ({learned_width}) + expert \
             ({expert_width}) + covariates ({}) = {fused}",
            outer.input_width(),
            self.covariate_width
        );

        Ok(DeepSet {
            inner,
            learned_width,
            aggregation: self.aggregation,
            expert: self.expert,
            covariate_width: self.covariate_width,
            outer,
        })
    }

    fn check_declared(&self, declared: DeclaredWidths) -> Result<()> {
        let learned = self.inner.as_ref().map_or(0, |(_, width)| *width);
        ensure_or!(
            learned == declared.learned,
            configuration,
            "config declares learned width {}, but the inner transform produces {learned}",
            declared.learned
        );
        if let (Some((input, output)), Some(outer)) = (declared.outer, &self.outer) {
            ensure_or!(
                outer.input_width() == input && outer.output_width() == output,
                configuration,
                "config declares an outer network {input} -> {output}, got {} -> {}",
                outer.input_width(),
                outer.output_width()
            );
        }
        Ok(())
    }
}
