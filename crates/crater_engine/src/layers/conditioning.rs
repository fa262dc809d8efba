//! ConditionEmbedding - fuses timestep, body and radius conditioning

use candle_core::{DType, Result, Tensor};
use candle_nn::{Embedding, Linear, Module, VarBuilder};

use super::TimestepEmbedding;

pub struct ConditionEmbedding {
    pub time: TimestepEmbedding,
    pub body: Embedding,
    pub radius: Linear,
}

impl ConditionEmbedding {
    pub fn load(
        time_embed_dim: usize,
        num_bodies: usize,
        out_dim: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let time = TimestepEmbedding::load(time_embed_dim, out_dim, vb.pp("time"))?;
        let body = candle_nn::embedding(num_bodies, out_dim, vb.pp("body"))?;
        let radius = candle_nn::linear(1, out_dim, vb.pp("radius"))?;
        Ok(Self { time, body, radius })
    }

    /// timestep: [B], body: [B] integer ids, radius: [B, 1] -> [B, out_dim]
    pub fn forward(&self, timestep: &Tensor, body: &Tensor, radius: &Tensor) -> Result<Tensor> {
        let t = self.time.forward(timestep)?;
        let b = self.body.forward(body)?;
        let r = self.radius.forward(&radius.to_dtype(DType::F32)?)?;
        (t + b)? + r
    }
}
