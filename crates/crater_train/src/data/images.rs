//! Image folder loader
//!
//! Layout: `<dir>/manifest.json` listing `{ "file", "body", "radius" }`
//! entries, image paths relative to `<dir>`.

use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

use super::TensorDataset;
use crate::error::{TrainError, TrainResult};

#[derive(Debug, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    pub body: u32,
    pub radius: f32,
}

/// Decodes `path`, resizes to `size`x`size` and maps pixels to [-1, 1].
/// Returns `channels * size * size` values in CHW order.
fn load_pixels(path: &Path, size: u32, channels: usize) -> TrainResult<Vec<f32>> {
    let img = image::open(path)?.resize_exact(size, size, FilterType::Triangle);
    let plane = (size * size) as usize;
    let mut out = vec![0f32; channels * plane];
    match channels {
        1 => {
            for (i, p) in img.to_luma8().pixels().enumerate() {
                out[i] = p.0[0] as f32 / 127.5 - 1.0;
            }
        }
        3 => {
            for (i, p) in img.to_rgb8().pixels().enumerate() {
                for c in 0..3 {
                    out[c * plane + i] = p.0[c] as f32 / 127.5 - 1.0;
                }
            }
        }
        n => {
            return Err(TrainError::dataset(format!(
                "unsupported channel count {} (expected 1 or 3)",
                n
            )))
        }
    }
    Ok(out)
}

pub fn load_image_folder<P: AsRef<Path>>(
    dir: P,
    image_size: usize,
    channels: usize,
) -> TrainResult<TensorDataset> {
    let dir = dir.as_ref();
    let manifest_path = dir.join("manifest.json");
    let file = File::open(&manifest_path).map_err(|e| {
        TrainError::dataset(format!("cannot open {:?}: {}", manifest_path, e))
    })?;
    let entries: Vec<ManifestEntry> = serde_json::from_reader(BufReader::new(file))?;
    if entries.is_empty() {
        return Err(TrainError::dataset(format!(
            "{:?} lists no images",
            manifest_path
        )));
    }

    let mut pixels = Vec::with_capacity(entries.len() * channels * image_size * image_size);
    let mut body = Vec::with_capacity(entries.len());
    let mut radius = Vec::with_capacity(entries.len());
    for entry in &entries {
        pixels.extend(load_pixels(&dir.join(&entry.file), image_size as u32, channels)?);
        body.push(entry.body);
        radius.push(entry.radius);
    }

    let images = Tensor::from_vec(
        pixels,
        (entries.len(), channels, image_size, image_size),
        &Device::Cpu,
    )?;
    info!(
        "Image folder: Loaded {} images from {:?} ({}x{}x{})",
        entries.len(),
        dir,
        channels,
        image_size,
        image_size
    );
    TensorDataset::new(images, body, radius)
}
