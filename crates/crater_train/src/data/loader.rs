//! DataLoader - fixed-size batches over a Dataset

use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{Dataset, Sample};
use crate::error::TrainResult;

/// Collated samples, always on the CPU.
#[derive(Debug, Clone)]
pub struct Batch {
    /// [B, C, H, W]
    pub images: Tensor,
    /// [B] u32
    pub body: Tensor,
    /// [B] f32
    pub radius: Tensor,
}

/// Per-example conditioning in the dtypes the model expects.
#[derive(Debug, Clone)]
pub struct Conditioning {
    /// [B] i64
    pub body: Tensor,
    /// [B, 1] f32
    pub radius: Tensor,
}

impl Batch {
    pub fn collate(samples: Vec<Sample>) -> TrainResult<Self> {
        let n = samples.len();
        let mut images = Vec::with_capacity(n);
        let mut body = Vec::with_capacity(n);
        let mut radius = Vec::with_capacity(n);
        for s in samples {
            images.push(s.image);
            body.push(s.body);
            radius.push(s.radius);
        }
        Ok(Self {
            images: Tensor::stack(&images, 0)?,
            body: Tensor::from_vec(body, n, &Device::Cpu)?,
            radius: Tensor::from_vec(radius, n, &Device::Cpu)?,
        })
    }

    pub fn len(&self) -> usize {
        self.images.dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits into the clean sample and its conditioning: body cast to an
    /// integer tensor, radius to f32 in column form.
    pub fn into_parts(self) -> TrainResult<(Tensor, Conditioning)> {
        let n = self.len();
        let body = self.body.to_dtype(DType::I64)?;
        let radius = self.radius.to_dtype(DType::F32)?.reshape((n, 1))?;
        Ok((self.images, Conditioning { body, radius }))
    }
}

pub struct DataLoader {
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    rng: StdRng,
}

impl DataLoader {
    /// Drops the final undersized batch by default.
    pub fn new(batch_size: usize, shuffle: bool, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            batch_size,
            shuffle,
            drop_last: true,
            rng,
        }
    }

    pub fn with_drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_batches(&self, len: usize) -> usize {
        if self.batch_size == 0 {
            return 0;
        }
        if self.drop_last {
            len / self.batch_size
        } else {
            len.div_ceil(self.batch_size)
        }
    }

    /// Fixes this epoch's sample order and returns its batches.
    /// Reshuffles on every call when shuffling is enabled.
    pub fn epoch<'d>(&mut self, dataset: &'d dyn Dataset) -> Batches<'d> {
        let len = dataset.len();
        let mut order: Vec<usize> = (0..len).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        let batches = self.num_batches(len);
        order.truncate((batches * self.batch_size).min(len));
        Batches {
            dataset,
            order,
            batch_size: self.batch_size,
            cursor: 0,
        }
    }
}

pub struct Batches<'d> {
    dataset: &'d dyn Dataset,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl Batches<'_> {
    /// Sample indices of this epoch, in batch order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

impl Iterator for Batches<'_> {
    type Item = TrainResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.batch_size == 0 || self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        let samples: TrainResult<Vec<Sample>> =
            indices.iter().map(|&i| self.dataset.get(i)).collect();
        Some(samples.and_then(Batch::collate))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.batch_size == 0 {
            return (0, Some(0));
        }
        let n = (self.order.len() - self.cursor).div_ceil(self.batch_size);
        (n, Some(n))
    }
}
