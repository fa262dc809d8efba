//! TrainerState - epoch cursor, hyperparameters and loss history

use candle_core::Device;
use std::ops::Range;
use std::path::PathBuf;

use super::checkpoint::ResumePoint;
use crate::config::TrainingConfig;
use crate::error::TrainResult;

#[derive(Debug, Clone)]
pub struct TrainerState {
    /// Current epoch. Never decreases within a run.
    pub epoch_iter: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub shuffle: bool,
    pub checkpoint: bool,
    pub checkpoint_path: PathBuf,
    pub checkpoint_iter: usize,
    pub max_timesteps: usize,
    pub device: Device,
    /// Mean loss per completed epoch, in epoch order
    pub losses: Vec<f32>,
}

impl TrainerState {
    pub fn new(config: &TrainingConfig, device: Device) -> TrainResult<Self> {
        config.validate()?;
        Ok(Self {
            epoch_iter: 0,
            epochs: config.epochs,
            batch_size: config.batch_size,
            shuffle: config.shuffle,
            checkpoint: config.checkpoint,
            checkpoint_path: PathBuf::from(&config.checkpoint_path),
            checkpoint_iter: config.checkpoint_iter,
            max_timesteps: config.max_timesteps,
            device,
            losses: Vec::new(),
        })
    }

    /// Epochs still to run.
    pub fn remaining_epochs(&self) -> Range<usize> {
        self.epoch_iter..self.epochs.max(self.epoch_iter)
    }

    /// Epoch 0 is never checkpointed.
    pub fn should_checkpoint(&self, epoch: usize) -> bool {
        self.checkpoint && self.checkpoint_iter > 0 && epoch > 0 && epoch % self.checkpoint_iter == 0
    }

    /// Continue after the checkpointed epoch with its loss history.
    pub fn restore(&mut self, point: &ResumePoint) {
        self.epoch_iter = point.next_epoch();
        self.losses = point.losses.clone();
    }
}
