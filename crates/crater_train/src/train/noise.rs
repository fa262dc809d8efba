//! Noise sampling for the forward diffusion process

use candle_core::{Device, Result, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Output of noising one batch. Lives for a single training step.
#[derive(Debug, Clone)]
pub struct NoisedSample {
    /// Injected noise, shaped like the clean sample
    pub noise: Tensor,
    /// [B] i64, each in `[0, max_timesteps)`
    pub timesteps: Tensor,
    /// Corrupted sample
    pub noisy: Tensor,
}

/// Source of the two random draws of a training step.
pub trait NoiseSource {
    /// Standard-normal noise with the shape, dtype and device of `like`.
    fn sample_noise(&mut self, like: &Tensor) -> Result<Tensor>;

    /// `batch` independent uniform draws from `[0, max_timesteps)` as [B] i64.
    fn sample_timesteps(&mut self, batch: usize, max_timesteps: usize) -> Result<Tensor>;
}

pub struct GaussianNoise {
    rng: StdRng,
}

impl GaussianNoise {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

impl NoiseSource for GaussianNoise {
    fn sample_noise(&mut self, like: &Tensor) -> Result<Tensor> {
        let shape = like.shape().clone();
        let values: Vec<f32> = (0..shape.elem_count())
            .map(|_| self.rng.sample::<f32, _>(StandardNormal))
            .collect();
        Tensor::from_vec(values, shape, like.device())?.to_dtype(like.dtype())
    }

    fn sample_timesteps(&mut self, batch: usize, max_timesteps: usize) -> Result<Tensor> {
        if max_timesteps == 0 {
            candle_core::bail!("max_timesteps must be positive");
        }
        let values: Vec<i64> = (0..batch)
            .map(|_| self.rng.gen_range(0..max_timesteps) as i64)
            .collect();
        Tensor::from_vec(values, batch, &Device::Cpu)
    }
}
