//! Training Configuration
//!
//! Every recognised hyperparameter with its default. Keys outside this set are
//! kept in `extra` and otherwise ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::warn;

use crate::error::{TrainError, TrainResult};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    // Diffusion
    pub max_timesteps: usize,
    // Checkpointing
    pub checkpoint: bool,
    pub checkpoint_path: String,
    pub checkpoint_iter: usize,
    // Training
    pub learning_rate: f64,
    pub learning_rate_warmup_steps: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub shuffle: bool,
    /// Seeds noise, timestep and shuffle RNGs. `None` draws from entropy.
    pub seed: Option<u64>,
    /// Unrecognised keys, preserved as given
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_timesteps: 1000,
            checkpoint: true,
            checkpoint_path: "./checkpoints/".to_string(),
            checkpoint_iter: 50,
            learning_rate: 1e-4,
            learning_rate_warmup_steps: 500,
            epochs: 1000,
            batch_size: 5,
            shuffle: true,
            seed: None,
            extra: BTreeMap::new(),
        }
    }
}

/// The canonical default configuration.
pub fn default_config() -> TrainingConfig {
    TrainingConfig::default()
}

impl TrainingConfig {
    pub fn validate(&self) -> TrainResult<()> {
        if self.max_timesteps == 0 {
            return Err(TrainError::config("max_timesteps must be positive"));
        }
        if self.batch_size == 0 {
            return Err(TrainError::config("batch_size must be positive"));
        }
        if self.checkpoint && self.checkpoint_iter == 0 {
            return Err(TrainError::config(
                "checkpoint_iter must be positive when checkpointing is enabled",
            ));
        }
        if self.checkpoint && self.checkpoint_path.is_empty() {
            return Err(TrainError::config(
                "checkpoint_path is required when checkpointing is enabled",
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainError::config(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> TrainResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.warn_unknown_keys();
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> TrainResult<Self> {
        let file = File::open(path.as_ref())?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.warn_unknown_keys();
        Ok(config)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> TrainResult<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    fn warn_unknown_keys(&self) {
        for key in self.extra.keys() {
            warn!("Ignoring unrecognised config option '{}'", key);
        }
    }
}
