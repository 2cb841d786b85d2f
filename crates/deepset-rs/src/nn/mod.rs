//! Reference network blocks built on `candle-nn`.
//!
//! The summary architecture treats its inner and outer networks as opaque modules; these blocks
//! are the default choice for both.

pub mod activations;
pub mod mlp;

pub use activations::Activation;
pub use mlp::{Mlp, MlpConfig};
