//! Checkpoint Management - Training state persistence

use candle_nn::VarMap;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{TrainError, TrainResult};

/// Persists trainer state at epoch boundaries.
pub trait Checkpointer {
    /// `losses` is the full loss history up to and including `epoch`.
    fn save(&mut self, epoch: usize, losses: &[f32]) -> TrainResult<()>;
}

/// Where a resumed run picks up.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePoint {
    /// Last checkpointed epoch
    pub epoch: usize,
    pub losses: Vec<f32>,
}

impl ResumePoint {
    pub fn next_epoch(&self) -> usize {
        self.epoch + 1
    }
}

/// Training state for serialization
#[derive(Serialize, Deserialize, Debug)]
pub struct CheckpointState {
    pub epoch: usize,
    pub losses: Vec<f32>,
    pub date: String,
    pub weights: String,
}

const STATE_FILE: &str = "training_state.json";

/// Writes through `<path>.tmp` and renames into place, so `path` always holds
/// either the previous or the new complete document.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> TrainResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn save_securely(varmap: &VarMap, path: &Path) -> TrainResult<()> {
    let lock_path = path.with_extension("safetensors.lock");
    let lock_file = File::create(&lock_path)?;
    lock_file.lock_exclusive()?;
    let saved = varmap.save(path);
    lock_file.unlock()?;
    saved?;
    Ok(())
}

/// Writes model variables plus a JSON state file per checkpoint into `dir`.
pub struct FileCheckpointer {
    dir: PathBuf,
    varmap: VarMap,
}

impl FileCheckpointer {
    pub fn new<P: Into<PathBuf>>(dir: P, varmap: VarMap) -> Self {
        Self {
            dir: dir.into(),
            varmap,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn weights_name(epoch: usize) -> String {
        format!("epoch_{epoch:05}.safetensors")
    }

    /// Saves the current variables outside the epoch cadence.
    pub fn save_weights(&self, file_name: &str) -> TrainResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file_name);
        save_securely(&self.varmap, &path)?;
        Ok(path)
    }

    /// Restores the most recent checkpoint (variables into the VarMap) and
    /// returns where to resume. `None` when `dir` holds no state file.
    pub fn load_latest(&mut self) -> TrainResult<Option<ResumePoint>> {
        let state_path = self.dir.join(STATE_FILE);
        if !state_path.exists() {
            return Ok(None);
        }
        let file = File::open(&state_path)?;
        let state: CheckpointState = serde_json::from_reader(BufReader::new(file))?;

        let weights = self.dir.join(&state.weights);
        if !weights.exists() {
            return Err(TrainError::checkpoint(format!(
                "{:?} references missing weights {:?}",
                state_path, weights
            )));
        }
        self.varmap.load(&weights)?;
        info!(
            "Resumed from checkpoint {:?} (epoch {}, {} recorded losses)",
            weights,
            state.epoch,
            state.losses.len()
        );
        Ok(Some(ResumePoint {
            epoch: state.epoch,
            losses: state.losses,
        }))
    }
}

impl Checkpointer for FileCheckpointer {
    fn save(&mut self, epoch: usize, losses: &[f32]) -> TrainResult<()> {
        let weights = Self::weights_name(epoch);
        let weights_path = self.save_weights(&weights)?;

        let state = CheckpointState {
            epoch,
            losses: losses.to_vec(),
            date: chrono::Local::now().to_rfc3339(),
            weights,
        };
        let json_path = weights_path.with_extension("json");
        write_json_atomic(&json_path, &state)?;
        // Generic state file for resume
        write_json_atomic(&self.dir.join(STATE_FILE), &state)?;

        info!("💾 Checkpoint saved: {:?} (epoch {})", weights_path, epoch);
        Ok(())
    }
}
