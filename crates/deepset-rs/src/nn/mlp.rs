//! Multilayer perceptron used for the inner and outer networks.
//!
//! `Linear -> activation` repeated `depth` times, followed by an output projection. The block
//! implements [`candle_core::Module`], so it plugs into any seam expecting an opaque transform.

use candle_core::{Module, Tensor};
use candle_nn::{Linear, VarBuilder};
use serde::{Deserialize, Serialize};

use super::activations::Activation;
use crate::error::{ensure_or, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpConfig {
    pub input_width: usize,
    pub hidden_width: usize,
    pub output_width: usize,
    /// Number of hidden layers.
    pub depth: usize,
    #[serde(default)]
    pub activation: Activation,
    /// Applied to the output projection; identity by default.
    #[serde(default = "default_output_activation")]
    pub output_activation: Activation,
}

fn default_output_activation() -> Activation {
    Activation::Identity
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            input_width: 1,
            hidden_width: 32,
            output_width: 1,
            depth: 2,
            activation: Activation::Relu,
            output_activation: Activation::Identity,
        }
    }
}

/// `depth` hidden layers plus an output projection.
#[derive(Debug, Clone)]
pub struct Mlp {
    pub hidden: Vec<Linear>,
    pub output: Linear,
    config: MlpConfig,
}

impl Mlp {
    /// Creates the block with parameters drawn from `vb` (`layer_{i}` and `output` prefixes).
    pub fn new(config: MlpConfig, vb: VarBuilder) -> Result<Self> {
        ensure_or!(
            config.input_width > 0 && config.output_width > 0,
            configuration,
            "mlp input and output widths must be positive, got {} -> {}",
            config.input_width,
            config.output_width
        );
        ensure_or!(
            config.depth == 0 || config.hidden_width > 0,
            configuration,
            "mlp with {} hidden layers needs a positive hidden width",
            config.depth
        );

        let mut hidden = Vec::with_capacity(config.depth);
        let mut width = config.input_width;
        for i in 0..config.depth {
            hidden.push(candle_nn::linear(
                width,
                config.hidden_width,
                vb.pp(format!("layer_{i}")),
            )?);
            width = config.hidden_width;
        }
        let output = candle_nn::linear(width, config.output_width, vb.pp("output"))?;
        Ok(Self {
            hidden,
            output,
            config,
        })
    }

    /// Wraps pre-built layers; widths are read from the weights.
    pub fn from_layers(
        hidden: Vec<Linear>,
        output: Linear,
        activation: Activation,
        output_activation: Activation,
    ) -> Result<Self> {
        let mut widths = Vec::with_capacity(hidden.len() + 1);
        for layer in hidden.iter().chain(std::iter::once(&output)) {
            let dims = layer.weight().dims();
            ensure_or!(
                dims.len() == 2,
                configuration,
                "linear weight must be 2D, got {:?}",
                dims
            );
            widths.push((dims[1], dims[0]));
        }
        for pair in widths.windows(2) {
            ensure_or!(
                pair[0].1 == pair[1].0,
                configuration,
                "layer output width {} does not feed next layer input width {}",
                pair[0].1,
                pair[1].0
            );
        }
        let config = MlpConfig {
            input_width: widths[0].0,
            hidden_width: hidden.first().map_or(0, |_| widths[0].1),
            output_width: widths[widths.len() - 1].1,
            depth: hidden.len(),
            activation,
            output_activation,
        };
        Ok(Self {
            hidden,
            output,
            config,
        })
    }

    pub fn config(&self) -> &MlpConfig {
        &self.config
    }

    pub fn input_width(&self) -> usize {
        self.config.input_width
    }

    pub fn output_width(&self) -> usize {
        self.config.output_width
    }
}

impl Module for Mlp {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let _span = tracing::trace_span!("Mlp::forward").entered();
        let mut h = x.clone();
        for layer in &self.hidden {
            h = self.config.activation.apply(&layer.forward(&h)?)?;
        }
        self.config
            .output_activation
            .apply(&self.output.forward(&h)?)
    }
}
