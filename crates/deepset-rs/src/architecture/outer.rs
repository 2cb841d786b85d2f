//! Downstream transform applied to the fused summary matrix.

use std::fmt;
use std::sync::Arc;

use candle_core::{Module, Tensor};

use crate::error::{ensure_or, Result};
use crate::nn::Mlp;

/// Opaque module with a declared input and output width.
///
/// The architecture checks the declared input width against the fused summary width at
/// construction, so a mismatch never reaches a forward pass.
#[derive(Clone)]
pub struct OuterMap {
    module: Arc<dyn Module + Send + Sync>,
    input_width: usize,
    output_width: usize,
}

impl OuterMap {
    pub fn new<M>(module: M, input_width: usize, output_width: usize) -> Result<Self>
    where
        M: Module + Send + Sync + 'static,
    {
        ensure_or!(
            input_width > 0 && output_width > 0,
            configuration,
            "outer map widths must be positive, got {input_width} -> {output_width}"
        );
        Ok(Self {
            module: Arc::new(module),
            input_width,
            output_width,
        })
    }

    /// Passes the fused summary through unchanged.
    pub fn identity(width: usize) -> Result<Self> {
        Self::new(
            |xs: &Tensor| -> candle_core::Result<Tensor> { Ok(xs.clone()) },
            width,
            width,
        )
    }

    /// Uses an [`Mlp`], reading both widths from its configuration.
    pub fn from_mlp(mlp: Mlp) -> Result<Self> {
        let input_width = mlp.input_width();
        let output_width = mlp.output_width();
        Self::new(mlp, input_width, output_width)
    }

    pub fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn output_width(&self) -> usize {
        self.output_width
    }

    /// Maps a `(sets, input_width)` matrix to `(sets, output_width)`.
    pub fn forward(&self, features: &Tensor) -> Result<Tensor> {
        let dims = features.dims();
        ensure_or!(
            dims.len() == 2 && dims[1] == self.input_width,
            dimension_mismatch,
            "outer map expects (sets, {}) input, got {:?}",
            self.input_width,
            dims
        );
        let output = self.module.forward(features)?;
        ensure_or!(
            output.dims() == [dims[0], self.output_width].as_slice(),
            dimension_mismatch,
            "outer map declared output width {} but produced shape {:?}",
            self.output_width,
            output.dims()
        );
        Ok(output)
    }
}

impl fmt::Debug for OuterMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OuterMap")
            .field("input_width", &self.input_width)
            .field("output_width", &self.output_width)
            .finish()
    }
}
