//! ResidualBlock - conditioned GroupNorm/SiLU/Conv residual block

use candle_core::{Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, GroupNorm, Linear, Module, VarBuilder};

pub struct ResidualBlock {
    pub norm_1: GroupNorm,
    pub conv_1: Conv2d,
    pub cond_proj: Linear,
    pub norm_2: GroupNorm,
    pub conv_2: Conv2d,
}

impl ResidualBlock {
    pub fn load(channels: usize, num_groups: usize, cond_dim: usize, vb: VarBuilder) -> Result<Self> {
        let conv_cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let norm_1 = candle_nn::group_norm(num_groups, channels, 1e-5, vb.pp("norm_1"))?;
        let conv_1 = candle_nn::conv2d(channels, channels, 3, conv_cfg, vb.pp("conv_1"))?;
        let cond_proj = candle_nn::linear(cond_dim, channels, vb.pp("cond_proj"))?;
        let norm_2 = candle_nn::group_norm(num_groups, channels, 1e-5, vb.pp("norm_2"))?;
        let conv_2 = candle_nn::conv2d(channels, channels, 3, conv_cfg, vb.pp("conv_2"))?;
        Ok(Self {
            norm_1,
            conv_1,
            cond_proj,
            norm_2,
            conv_2,
        })
    }

    /// x: [B, C, H, W], cond: [B, cond_dim]
    pub fn forward(&self, x: &Tensor, cond: &Tensor) -> Result<Tensor> {
        let h = candle_nn::ops::silu(&self.norm_1.forward(x)?)?;
        let h = self.conv_1.forward(&h)?;

        let (b, c) = (h.dim(0)?, h.dim(1)?);
        let c_emb = self
            .cond_proj
            .forward(&candle_nn::ops::silu(cond)?)?
            .reshape((b, c, 1, 1))?;
        let h = h.broadcast_add(&c_emb)?;

        let h = candle_nn::ops::silu(&self.norm_2.forward(&h)?)?;
        let h = self.conv_2.forward(&h)?;
        x + h
    }
}
