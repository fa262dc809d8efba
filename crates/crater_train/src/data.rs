//! Data Module - crater samples and batching
//!
//! - Dataset: indexed source of `(image, body, radius)` samples
//! - TensorDataset: in-memory dataset, loadable from safetensors
//! - images: image folder + manifest loader
//! - loader: fixed-size batching with shuffle and drop-last

use candle_core::{DType, Device, Tensor};
use std::path::Path;

use crate::error::{TrainError, TrainResult};

pub mod images;
pub mod loader;

pub use images::load_image_folder;
pub use loader::{Batch, Batches, Conditioning, DataLoader};

/// One dataset element.
#[derive(Debug, Clone)]
pub struct Sample {
    /// [C, H, W]
    pub image: Tensor,
    /// Categorical body id
    pub body: u32,
    pub radius: f32,
}

pub trait Dataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> TrainResult<Sample>;
}

/// Samples held as one stacked image tensor plus per-example attributes.
pub struct TensorDataset {
    images: Tensor,
    body: Vec<u32>,
    radius: Vec<f32>,
}

impl TensorDataset {
    /// images: [N, C, H, W]
    pub fn new(images: Tensor, body: Vec<u32>, radius: Vec<f32>) -> TrainResult<Self> {
        if images.rank() != 4 {
            return Err(TrainError::dataset(format!(
                "images must be [N, C, H, W], got {:?}",
                images.dims()
            )));
        }
        let n = images.dim(0)?;
        if body.len() != n || radius.len() != n {
            return Err(TrainError::dataset(format!(
                "{} images but {} body ids and {} radii",
                n,
                body.len(),
                radius.len()
            )));
        }
        let images = images.to_device(&Device::Cpu)?.to_dtype(DType::F32)?;
        Ok(Self {
            images,
            body,
            radius,
        })
    }

    /// Reads tensors named `images` [N, C, H, W], `body` [N] and `radius` [N].
    pub fn from_safetensors<P: AsRef<Path>>(path: P) -> TrainResult<Self> {
        let path = path.as_ref();
        let mut tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
        let mut take = |name: &str| {
            tensors.remove(name).ok_or_else(|| {
                TrainError::dataset(format!("{:?} has no '{}' tensor", path, name))
            })
        };
        let images = take("images")?;
        let body = take("body")?.flatten_all()?.to_dtype(DType::U32)?.to_vec1::<u32>()?;
        let radius = take("radius")?
            .flatten_all()?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;
        tracing::info!(
            "TensorDataset: Loaded {:?} ({} samples, image {:?})",
            path,
            body.len(),
            &images.dims()[1..]
        );
        Self::new(images, body, radius)
    }

    pub fn image_dims(&self) -> &[usize] {
        &self.images.dims()[1..]
    }
}

impl Dataset for TensorDataset {
    fn len(&self) -> usize {
        self.body.len()
    }

    fn get(&self, index: usize) -> TrainResult<Sample> {
        if index >= self.len() {
            return Err(TrainError::dataset(format!(
                "index {} out of range for {} samples",
                index,
                self.len()
            )));
        }
        Ok(Sample {
            image: self.images.get(index)?,
            body: self.body[index],
            radius: self.radius[index],
        })
    }
}
