//! Error taxonomy shared by every entry point of the crate.

use thiserror::Error;

/// Failures surfaced while building or evaluating a summary network.
///
/// Every variant is fail-fast: nothing in the crate retries or returns partial results.
#[derive(Debug, Error)]
pub enum DeepSetError {
    /// Invalid construction, detected eagerly before any forward pass.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Replicates or graphs in a collection disagree on a structurally required axis.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// Counts or widths disagree with what the architecture declares.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    /// Failure reported by the tensor substrate or an opaque transform.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl DeepSetError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn shape_mismatch(message: impl Into<String>) -> Self {
        Self::ShapeMismatch(message.into())
    }

    pub fn dimension_mismatch(message: impl Into<String>) -> Self {
        Self::DimensionMismatch(message.into())
    }
}

pub type Result<T> = std::result::Result<T, DeepSetError>;

/// Returns early with the given [`DeepSetError`] constructor when `cond` does not hold.
macro_rules! ensure_or {
    ($cond:expr, $ctor:ident, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::DeepSetError::$ctor(format!($($arg)+)));
        }
    };
}

pub(crate) use ensure_or;
