use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use vcguard::BrainSetting;

/// Distribution of the number of units a tenant asks for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args")]
pub enum SizeDist {
    /// uniform on `min..=max`
    Uniform { min: usize, max: usize },
    /// zipf on `1..=max`, small tenants dominate
    Zipf { max: usize, exponent: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Number of tenants in each trial
    pub ncases: usize,

    /// Mean number of tenant arrivals per second
    pub arrival_rate: f64,

    /// Mean tenant lifetime in seconds, exponentially distributed
    pub mean_duration: f64,

    /// Number of units per tenant
    pub size: SizeDist,

    /// Per-unit bandwidth choices in Mb/s, picked uniformly
    pub bandwidth: Vec<f64>,

    /// Number of trials, each with its own workload and brain seed
    #[serde(default = "default_repeat")]
    pub repeat: usize,

    /// Seed of the workload generator
    #[serde(default)]
    pub seed: u64,

    /// Check every ledger and request invariant after each event; slow
    #[serde(default)]
    pub audit: bool,

    /// Output path of the result file
    #[serde(default)]
    pub directory: Option<std::path::PathBuf>,

    /// Brain settings
    pub brain: BrainSetting,

    /// Environment variables
    #[serde(default)]
    pub envs: toml::value::Table,
}

fn default_repeat() -> usize {
    1
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.arrival_rate > 0.0) {
            return Err(anyhow!("arrival_rate must be positive: {}", self.arrival_rate));
        }
        if !(self.mean_duration > 0.0) {
            return Err(anyhow!("mean_duration must be positive: {}", self.mean_duration));
        }
        if self.bandwidth.is_empty() || self.bandwidth.iter().any(|&b| !(b > 0.0)) {
            return Err(anyhow!("bandwidth choices must be positive: {:?}", self.bandwidth));
        }
        match self.size {
            SizeDist::Uniform { min, max } if min == 0 || min > max => {
                Err(anyhow!("bad uniform size range: {}..={}", min, max))
            }
            SizeDist::Zipf { max, exponent } if max == 0 || !(exponent > 0.0) => Err(anyhow!(
                "bad zipf size distribution: max {}, exponent {}",
                max,
                exponent
            )),
            _ => Ok(()),
        }
    }
}

pub fn parse_config(content: &str) -> Result<ExperimentConfig> {
    let config: ExperimentConfig = toml::from_str(content).context("parse failed")?;
    config.validate()?;
    Ok(config)
}

pub fn read_config<P: AsRef<std::path::Path>>(path: P) -> Result<ExperimentConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("fail to read config file {:?}", path))?;
    parse_config(&content)
}
