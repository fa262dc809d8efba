//! CraterDenoiser - conditional residual conv net

use candle_core::{Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, GroupNorm, Module, VarBuilder};

use super::{Denoiser, DenoiserConfig};
use crate::layers::{ConditionEmbedding, ResidualBlock};

pub struct CraterDenoiser {
    pub config: DenoiserConfig,
    pub cond: ConditionEmbedding,
    pub conv_in: Conv2d,
    pub blocks: Vec<ResidualBlock>,
    pub norm_out: GroupNorm,
    pub conv_out: Conv2d,
}

impl CraterDenoiser {
    pub fn load(config: DenoiserConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let hidden = config.hidden_channels;
        let conv_cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };

        let cond = ConditionEmbedding::load(
            config.time_embed_dim,
            config.num_bodies,
            hidden,
            vb.pp("cond"),
        )?;
        let conv_in = candle_nn::conv2d(config.in_channels, hidden, 3, conv_cfg, vb.pp("conv_in"))?;
        let mut blocks = Vec::with_capacity(config.num_blocks);
        for i in 0..config.num_blocks {
            blocks.push(ResidualBlock::load(
                hidden,
                config.num_groups,
                hidden,
                vb.pp(format!("blocks.{i}")),
            )?);
        }
        let norm_out = candle_nn::group_norm(config.num_groups, hidden, 1e-5, vb.pp("norm_out"))?;
        let conv_out =
            candle_nn::conv2d(hidden, config.in_channels, 3, conv_cfg, vb.pp("conv_out"))?;

        Ok(Self {
            config,
            cond,
            conv_in,
            blocks,
            norm_out,
            conv_out,
        })
    }
}

impl Denoiser for CraterDenoiser {
    fn predict_noise(
        &self,
        x: &Tensor,
        timestep: &Tensor,
        body: &Tensor,
        radius: &Tensor,
    ) -> Result<Tensor> {
        let cond = self.cond.forward(timestep, body, radius)?;
        let mut h = self.conv_in.forward(x)?;
        for block in &self.blocks {
            h = block.forward(&h, &cond)?;
        }
        let h = candle_nn::ops::silu(&self.norm_out.forward(&h)?)?;
        self.conv_out.forward(&h)
    }
}
