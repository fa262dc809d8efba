//! Train Module - diffusion training pipeline
//!
//! - state: TrainerState shared by every trainer
//! - diffusion: the noise-prediction training loop
//! - noise / device: noise sampling and device placement
//! - lr / checkpoint / observer: the loop's collaborators
//! - args: CLI entry point

pub mod args;
pub mod checkpoint;
pub mod device;
pub mod diffusion;
pub mod lr;
pub mod noise;
pub mod observer;
pub mod state;

pub use args::{run, TrainArgs};
pub use checkpoint::{Checkpointer, FileCheckpointer, ResumePoint};
pub use device::ToDevice;
pub use diffusion::{DiffusionTrainer, TrainerComponents};
pub use lr::{ConstantWithWarmup, LrScheduler, WarmupCosine};
pub use noise::{GaussianNoise, NoiseSource, NoisedSample};
pub use observer::{LogObserver, ProgressObserver, TrainingObserver};
pub use state::TrainerState;

use crate::error::TrainResult;

/// A training strategy over shared `TrainerState`.
pub trait Trainer {
    fn state(&self) -> &TrainerState;

    fn state_mut(&mut self) -> &mut TrainerState;

    /// Runs epochs `state().epoch_iter..state().epochs`.
    fn train(&mut self) -> TrainResult<()>;
}
