//! Device placement for a training step's tensors

use candle_core::{Device, Result, Tensor};

use super::noise::NoisedSample;
use crate::data::Conditioning;

/// Moves every tensor of a value to `device`.
pub trait ToDevice: Sized {
    fn to_device(self, device: &Device) -> Result<Self>;
}

impl ToDevice for Tensor {
    fn to_device(self, device: &Device) -> Result<Self> {
        if self.device().same_device(device) {
            Ok(self)
        } else {
            Tensor::to_device(&self, device)
        }
    }
}

impl ToDevice for NoisedSample {
    fn to_device(self, device: &Device) -> Result<Self> {
        Ok(Self {
            noise: ToDevice::to_device(self.noise, device)?,
            timesteps: ToDevice::to_device(self.timesteps, device)?,
            noisy: ToDevice::to_device(self.noisy, device)?,
        })
    }
}

impl ToDevice for Conditioning {
    fn to_device(self, device: &Device) -> Result<Self> {
        Ok(Self {
            body: ToDevice::to_device(self.body, device)?,
            radius: ToDevice::to_device(self.radius, device)?,
        })
    }
}
