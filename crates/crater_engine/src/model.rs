//! Model Module - noise prediction
//!
//! - Denoiser: call contract used by the training loop
//! - CraterDenoiser: conditional residual conv net
//! - DenoiserConfig: its configuration

pub mod config;
pub mod denoiser;

pub use config::DenoiserConfig;
pub use denoiser::CraterDenoiser;

use candle_core::{Result, Tensor};

/// A model that predicts the noise injected into `x`.
///
/// - `x`: corrupted sample `[B, ...]`
/// - `timestep`: per-example timestep index `[B]`
/// - `body`: per-example discrete conditioning id `[B]`
/// - `radius`: per-example continuous conditioning value `[B, 1]`
///
/// The returned tensor must have the shape of `x`.
pub trait Denoiser {
    fn predict_noise(
        &self,
        x: &Tensor,
        timestep: &Tensor,
        body: &Tensor,
        radius: &Tensor,
    ) -> Result<Tensor>;
}
