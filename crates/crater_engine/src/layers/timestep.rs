//! TimestepEmbedding - sinusoidal timestep features

use candle_core::{DType, Result, Tensor, D};
use candle_nn::{Linear, Module, VarBuilder};

/// Transformer-style sinusoidal embedding of integer timesteps.
/// `timesteps`: [B] (any numeric dtype) -> [B, dim]
pub fn sinusoidal_embedding(timesteps: &Tensor, dim: usize) -> Result<Tensor> {
    let half = dim / 2;
    let device = timesteps.device();
    let exponent = -(10000f64.ln()) / half as f64;
    let freqs = (Tensor::arange(0u32, half as u32, device)?.to_dtype(DType::F32)? * exponent)?
        .exp()?
        .unsqueeze(0)?;
    let t = timesteps.to_dtype(DType::F32)?.unsqueeze(1)?;
    let args = t.broadcast_mul(&freqs)?;
    Tensor::cat(&[args.sin()?, args.cos()?], D::Minus1)
}

pub struct TimestepEmbedding {
    pub dim: usize,
    pub linear_1: Linear,
    pub linear_2: Linear,
}

impl TimestepEmbedding {
    pub fn load(dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Self> {
        let linear_1 = candle_nn::linear(dim, out_dim, vb.pp("linear_1"))?;
        let linear_2 = candle_nn::linear(out_dim, out_dim, vb.pp("linear_2"))?;
        Ok(Self {
            dim,
            linear_1,
            linear_2,
        })
    }

    pub fn forward(&self, timesteps: &Tensor) -> Result<Tensor> {
        let emb = sinusoidal_embedding(timesteps, self.dim)?;
        let h = candle_nn::ops::silu(&self.linear_1.forward(&emb)?)?;
        self.linear_2.forward(&h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_sinusoidal_at_zero() -> Result<()> {
        let t = Tensor::new(&[0i64, 10], &Device::Cpu)?;
        let emb = sinusoidal_embedding(&t, 8)?;
        assert_eq!(emb.dims(), &[2, 8]);

        // t = 0: sin terms are 0, cos terms are 1
        let row0 = emb.get(0)?.to_vec1::<f32>()?;
        assert!(row0[..4].iter().all(|v| v.abs() < 1e-6));
        assert!(row0[4..].iter().all(|v| (v - 1.0).abs() < 1e-6));
        Ok(())
    }
}
