//! DenoiserConfig - Model configuration

use candle_core::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiserConfig {
    pub in_channels: usize,
    pub hidden_channels: usize,
    #[serde(alias = "n_blocks")]
    pub num_blocks: usize,
    pub num_groups: usize,
    pub num_bodies: usize,
    pub time_embed_dim: usize,
}

impl Default for DenoiserConfig {
    fn default() -> Self {
        Self {
            in_channels: 1,
            hidden_channels: 64,
            num_blocks: 2,
            num_groups: 8,
            num_bodies: 8,
            time_embed_dim: 128,
        }
    }
}

impl DenoiserConfig {
    pub fn from_json_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)?;
        serde_json::from_str(&config_str).map_err(candle_core::Error::wrap)
    }

    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0 || self.hidden_channels == 0 || self.num_bodies == 0 {
            bail!("in_channels, hidden_channels and num_bodies must be positive");
        }
        if self.num_groups == 0 || self.hidden_channels % self.num_groups != 0 {
            bail!(
                "hidden_channels ({}) must be divisible by num_groups ({})",
                self.hidden_channels,
                self.num_groups
            );
        }
        if self.time_embed_dim < 2 || self.time_embed_dim % 2 != 0 {
            bail!("time_embed_dim must be even, got {}", self.time_embed_dim);
        }
        Ok(())
    }
}
