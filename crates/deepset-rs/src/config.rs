use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregationKind;
use crate::expert::ExpertStatistic;
use crate::nn::MlpConfig;

/// Serializable description of a summary network.
///
/// The transforms themselves are opaque and supplied in code; the configuration fixes the
/// reduction, the declared widths, and the built-in expert statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepSetConfig {
    #[serde(default = "default_aggregation")]
    pub aggregation: AggregationKind,
    /// Width of the learned summary; zero when only expert statistics are used.
    #[serde(default)]
    pub learned_width: usize,
    /// Built-in expert statistics, applied in order and concatenated.
    #[serde(default)]
    pub expert_statistics: Vec<String>,
    #[serde(default)]
    pub covariate_width: usize,
    #[serde(default)]
    pub inner: Option<MlpConfig>,
    #[serde(default)]
    pub outer: Option<MlpConfig>,
}

fn default_aggregation() -> AggregationKind {
    AggregationKind::Mean
}

impl Default for DeepSetConfig {
    fn default() -> Self {
        Self {
            aggregation: AggregationKind::Mean,
            learned_width: 0,
            expert_statistics: Vec::new(),
            covariate_width: 0,
            inner: None,
            outer: None,
        }
    }
}

impl DeepSetConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: DeepSetConfig =
            serde_json::from_str(json).context("failed to parse deep set config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize deep set config")
    }

    /// Total width of the expert statistics named in the config.
    pub fn expert_width(&self) -> Result<usize> {
        self.expert_statistics
            .iter()
            .map(|name| -> Result<usize> { Ok(ExpertStatistic::from_name(name)?.width()) })
            .sum()
    }

    /// Width the outer network must accept.
    pub fn summary_width(&self) -> Result<usize> {
        Ok(self.learned_width + self.expert_width()? + self.covariate_width)
    }

    /// Cross-checks widths so a bad file fails at load time.
    pub fn validate(&self) -> Result<()> {
        let expert_width = self.expert_width()?;
        ensure!(
            self.learned_width > 0 || expert_width > 0,
            "config needs a learned summary, expert statistics, or both"
        );
        if let Some(inner) = &self.inner {
            ensure!(
                inner.output_width == self.learned_width,
                "inner network output width {} does not match learned_width {}",
                inner.output_width,
                self.learned_width
            );
        }
        if let Some(outer) = &self.outer {
            let summary_width = self.summary_width()?;
            ensure!(
                outer.input_width == summary_width,
                "outer network input width {} does not match summary width {}",
                outer.input_width,
                summary_width
            );
        }
        Ok(())
    }
}
