//! Crater Train
//!
//! Denoising-diffusion training for the crater denoiser:
//! - TrainingConfig: hyperparameters and their defaults
//! - data: datasets and the batching DataLoader
//! - train: TrainerState, the Trainer strategy and the diffusion loop

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod train;

pub use config::{default_config, TrainingConfig};
pub use error::{TrainError, TrainResult};
pub use train::{DiffusionTrainer, Trainer, TrainerComponents, TrainerState};
