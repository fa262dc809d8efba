//! Crater Engine
//!
//! Numeric core of the crater diffusion trainer:
//! - DdpmScheduler: forward-diffusion noising (`add_noise`)
//! - Denoiser: the noise-prediction model contract
//! - CraterDenoiser: a conditional residual conv net implementing it

pub mod layers;
pub mod model;
pub mod scheduler;

pub use model::{CraterDenoiser, Denoiser, DenoiserConfig};
pub use scheduler::{BetaSchedule, DdpmScheduler, DdpmSchedulerConfig, NoiseScheduler};
