//! Noise Scheduler - DDPM forward process
//!
//! Only the training half of the scheduler lives here: given a clean sample,
//! a noise sample and per-example timesteps, produce the corrupted sample
//! `sqrt(alpha_bar_t) * x0 + sqrt(1 - alpha_bar_t) * noise`.

use candle_core::{bail, DType, Device, Result, Tensor};
use serde::{Deserialize, Serialize};

/// Forward-noising contract used by the training loop.
pub trait NoiseScheduler {
    /// Size of the discrete timestep range `[0, n)`.
    fn num_train_timesteps(&self) -> usize;

    /// Corrupt `clean` with `noise` at `timesteps` (one index per example).
    /// The result has the shape of `clean`.
    fn add_noise(&self, clean: &Tensor, noise: &Tensor, timesteps: &Tensor) -> Result<Tensor>;
}

/// How beta ranges from its minimum to its maximum value during training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaSchedule {
    /// Linear interpolation.
    #[default]
    Linear,
    /// Linear interpolation of the square root of beta.
    ScaledLinear,
    /// Glide cosine schedule
    SquaredcosCapV2,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DdpmSchedulerConfig {
    pub num_train_timesteps: usize,
    pub beta_start: f64,
    pub beta_end: f64,
    pub beta_schedule: BetaSchedule,
}

impl Default for DdpmSchedulerConfig {
    fn default() -> Self {
        Self {
            num_train_timesteps: 1000,
            beta_start: 1e-4,
            beta_end: 0.02,
            beta_schedule: BetaSchedule::Linear,
        }
    }
}

impl DdpmSchedulerConfig {
    /// Missing keys take their defaults.
    pub fn from_json_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)?;
        serde_json::from_str(&config_str).map_err(candle_core::Error::wrap)
    }
}

/// Cosine schedule: discretizes `alpha_bar(t) = cos((t + 0.008) / 1.008 * pi / 2)^2`
/// over `t = [0, 1]`, clipping every beta at `max_beta`.
fn betas_for_alpha_bar(num_diffusion_timesteps: usize, max_beta: f64) -> Vec<f64> {
    let alpha_bar =
        |t: f64| f64::cos((t + 0.008) / 1.008 * std::f64::consts::FRAC_PI_2).powi(2);
    let n = num_diffusion_timesteps as f64;
    (0..num_diffusion_timesteps)
        .map(|i| {
            let t1 = i as f64 / n;
            let t2 = (i + 1) as f64 / n;
            (1.0 - alpha_bar(t2) / alpha_bar(t1)).min(max_beta)
        })
        .collect()
}

fn linspace(start: f64, end: f64, steps: usize) -> Vec<f64> {
    if steps == 1 {
        return vec![start];
    }
    let delta = (end - start) / (steps - 1) as f64;
    (0..steps).map(|i| start + delta * i as f64).collect()
}

pub struct DdpmScheduler {
    config: DdpmSchedulerConfig,
    betas: Vec<f64>,
    alphas_cumprod: Vec<f64>,
    // Kept on the CPU, moved to the sample's device in `add_noise`.
    sqrt_alphas_cumprod: Tensor,
    sqrt_one_minus_alphas_cumprod: Tensor,
}

impl DdpmScheduler {
    pub fn new(config: DdpmSchedulerConfig) -> Result<Self> {
        let n = config.num_train_timesteps;
        if n == 0 {
            bail!("num_train_timesteps must be positive");
        }
        if !(config.beta_start > 0.0 && config.beta_end < 1.0 && config.beta_start <= config.beta_end)
        {
            bail!(
                "invalid beta range [{}, {}]",
                config.beta_start,
                config.beta_end
            );
        }

        let betas = match config.beta_schedule {
            BetaSchedule::Linear => linspace(config.beta_start, config.beta_end, n),
            BetaSchedule::ScaledLinear => {
                linspace(config.beta_start.sqrt(), config.beta_end.sqrt(), n)
                    .into_iter()
                    .map(|b| b * b)
                    .collect()
            }
            BetaSchedule::SquaredcosCapV2 => betas_for_alpha_bar(n, 0.999),
        };

        let mut alphas_cumprod = Vec::with_capacity(n);
        let mut acc = 1.0;
        for beta in &betas {
            acc *= 1.0 - beta;
            alphas_cumprod.push(acc);
        }

        let sqrt_acp: Vec<f32> = alphas_cumprod.iter().map(|a| a.sqrt() as f32).collect();
        let sqrt_one_minus: Vec<f32> = alphas_cumprod
            .iter()
            .map(|a| (1.0 - a).sqrt() as f32)
            .collect();

        tracing::debug!(
            "DDPM scheduler: {} timesteps, {:?}, alpha_bar[T-1] = {:.6}",
            n,
            config.beta_schedule,
            alphas_cumprod[n - 1]
        );

        Ok(Self {
            config,
            betas,
            alphas_cumprod,
            sqrt_alphas_cumprod: Tensor::from_vec(sqrt_acp, n, &Device::Cpu)?,
            sqrt_one_minus_alphas_cumprod: Tensor::from_vec(sqrt_one_minus, n, &Device::Cpu)?,
        })
    }

    pub fn config(&self) -> &DdpmSchedulerConfig {
        &self.config
    }

    pub fn betas(&self) -> &[f64] {
        &self.betas
    }

    pub fn alphas_cumprod(&self) -> &[f64] {
        &self.alphas_cumprod
    }

    /// Gathers `table[t]` per example and reshapes it to `[B, 1, ..., 1]`
    /// so it broadcasts against a sample of rank `rank`.
    fn coefficients(&self, table: &Tensor, idx: &Tensor, rank: usize, like: &Tensor) -> Result<Tensor> {
        let batch = idx.dim(0)?;
        let mut shape = vec![batch];
        shape.resize(rank, 1);
        table
            .to_device(like.device())?
            .index_select(&idx.to_device(like.device())?, 0)?
            .reshape(shape)?
            .to_dtype(like.dtype())
    }
}

impl NoiseScheduler for DdpmScheduler {
    fn num_train_timesteps(&self) -> usize {
        self.config.num_train_timesteps
    }

    fn add_noise(&self, clean: &Tensor, noise: &Tensor, timesteps: &Tensor) -> Result<Tensor> {
        if clean.shape() != noise.shape() {
            bail!(
                "noise shape {:?} does not match sample shape {:?}",
                noise.dims(),
                clean.dims()
            );
        }
        let batch = clean.dim(0)?;
        let idx = timesteps.flatten_all()?.to_dtype(DType::U32)?;
        if idx.dim(0)? != batch {
            bail!(
                "expected {} timesteps, got {}",
                batch,
                idx.dim(0)?
            );
        }
        let max_t = idx.max(0)?.to_scalar::<u32>()? as usize;
        if max_t >= self.config.num_train_timesteps {
            bail!(
                "timestep {} outside [0, {})",
                max_t,
                self.config.num_train_timesteps
            );
        }

        let rank = clean.rank();
        let a = self.coefficients(&self.sqrt_alphas_cumprod, &idx, rank, clean)?;
        let b = self.coefficients(&self.sqrt_one_minus_alphas_cumprod, &idx, rank, clean)?;
        clean.broadcast_mul(&a)? + noise.broadcast_mul(&b)?
    }
}
