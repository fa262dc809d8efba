//! Diffusion Training Loop - noise-prediction objective
//!
//! Per batch: draw noise and timesteps, corrupt the clean sample through the
//! noise scheduler, predict the noise, minimise the MSE between injected and
//! predicted noise. Per epoch: record the mean batch loss and checkpoint on
//! the configured cadence.

use candle_core::{DType, Device, Tensor};
use candle_nn::Optimizer;
use crater_engine::{Denoiser, NoiseScheduler};
use tracing::{debug, info, warn};

use super::checkpoint::Checkpointer;
use super::device::ToDevice;
use super::lr::LrScheduler;
use super::noise::{GaussianNoise, NoiseSource, NoisedSample};
use super::observer::TrainingObserver;
use super::state::TrainerState;
use super::Trainer;
use crate::config::TrainingConfig;
use crate::data::{Batch, DataLoader, Dataset};
use crate::error::{TrainError, TrainResult};

/// Collaborators borrowed by the trainer for its lifetime.
pub struct TrainerComponents<'a, M: ?Sized, O> {
    pub model: &'a M,
    pub optimizer: &'a mut O,
    pub dataset: &'a dyn Dataset,
    pub noise_scheduler: &'a dyn NoiseScheduler,
    pub lr_scheduler: &'a mut dyn LrScheduler,
    pub checkpointer: &'a mut dyn Checkpointer,
}

pub struct DiffusionTrainer<'a, M: ?Sized, O> {
    state: TrainerState,
    model: &'a M,
    optimizer: &'a mut O,
    dataset: &'a dyn Dataset,
    noise_scheduler: &'a dyn NoiseScheduler,
    lr_scheduler: &'a mut dyn LrScheduler,
    checkpointer: &'a mut dyn Checkpointer,
    loader: DataLoader,
    noise: Box<dyn NoiseSource + 'a>,
    observers: Vec<Box<dyn TrainingObserver + 'a>>,
}

impl<'a, M, O> DiffusionTrainer<'a, M, O>
where
    M: Denoiser + ?Sized,
    O: Optimizer,
{
    pub fn new(
        components: TrainerComponents<'a, M, O>,
        device: Device,
        config: &TrainingConfig,
    ) -> TrainResult<Self> {
        let state = TrainerState::new(config, device)?;

        let range = components.noise_scheduler.num_train_timesteps();
        if state.max_timesteps > range {
            return Err(TrainError::config(format!(
                "max_timesteps ({}) exceeds the noise scheduler's {} training timesteps",
                state.max_timesteps, range
            )));
        }
        if state.max_timesteps < range {
            warn!(
                "max_timesteps ({}) covers only part of the scheduler's {} timesteps",
                state.max_timesteps, range
            );
        }

        let loader = DataLoader::new(
            state.batch_size,
            state.shuffle,
            config.seed.map(|s| s.wrapping_add(1)),
        );

        Ok(Self {
            state,
            model: components.model,
            optimizer: components.optimizer,
            dataset: components.dataset,
            noise_scheduler: components.noise_scheduler,
            lr_scheduler: components.lr_scheduler,
            checkpointer: components.checkpointer,
            loader,
            noise: Box::new(GaussianNoise::new(config.seed)),
            observers: Vec::new(),
        })
    }

    pub fn with_noise_source(mut self, noise: Box<dyn NoiseSource + 'a>) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn TrainingObserver + 'a>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn batches_per_epoch(&self) -> usize {
        self.loader.num_batches(self.dataset.len())
    }

    /// Forward diffusion for one batch: noise, timesteps, corrupted sample.
    pub fn noise_batch(&mut self, clean: &Tensor) -> TrainResult<NoisedSample> {
        let noise = self.noise.sample_noise(clean)?;
        if noise.shape() != clean.shape() {
            return Err(TrainError::ShapeMismatch {
                expected: clean.dims().to_vec(),
                got: noise.dims().to_vec(),
            });
        }
        let timesteps = self
            .noise
            .sample_timesteps(clean.dim(0)?, self.state.max_timesteps)?
            .to_dtype(DType::I64)?;
        let noisy = self.noise_scheduler.add_noise(clean, &noise, &timesteps)?;
        Ok(NoisedSample {
            noise,
            timesteps,
            noisy,
        })
    }

    /// One optimisation step. Returns the batch loss.
    pub fn train_step(&mut self, batch: Batch) -> TrainResult<f32> {
        // Gradients never accumulate: every backward pass returns a fresh GradStore.
        let (clean, cond) = batch.into_parts()?;

        let noised = self.noise_batch(&clean)?;
        let device = &self.state.device;
        let noised = noised.to_device(device)?;
        let cond = cond.to_device(device)?;

        let predicted = self.model.predict_noise(
            &noised.noisy,
            &noised.timesteps,
            &cond.body,
            &cond.radius,
        )?;
        if predicted.shape() != noised.noise.shape() {
            return Err(TrainError::ShapeMismatch {
                expected: noised.noise.dims().to_vec(),
                got: predicted.dims().to_vec(),
            });
        }

        let loss = candle_nn::loss::mse(&noised.noise, &predicted)?;
        let grads = loss.backward()?;

        self.optimizer.step(&grads)?;
        let lr = self.lr_scheduler.step();
        self.optimizer.set_learning_rate(lr);

        Ok(loss.to_dtype(DType::F32)?.to_scalar::<f32>()?)
    }

    fn run_epoch(&mut self, epoch: usize) -> TrainResult<f32> {
        let batches = self.loader.epoch(self.dataset);

        let mut loss_sum = 0f64;
        let mut batch_count = 0usize;
        let mut non_finite = 0usize;
        for batch in batches {
            // Rate applied by this step's optimizer update
            let lr = self.optimizer.learning_rate();
            let loss = self.train_step(batch?)?;
            if !loss.is_finite() {
                non_finite += 1;
            }
            loss_sum += loss as f64;
            debug!("Epoch {} Batch {} | Loss: {:.6}", epoch, batch_count, loss);

            for obs in &mut self.observers {
                obs.on_batch_end(epoch, batch_count, loss, lr);
            }
            batch_count += 1;
        }

        if batch_count == 0 {
            return Err(TrainError::NoBatches {
                samples: self.dataset.len(),
                batch_size: self.loader.batch_size(),
            });
        }
        if non_finite > 0 {
            warn!(
                "⚠️ Epoch {}: {} of {} batch losses were non-finite",
                epoch, non_finite, batch_count
            );
        }
        Ok((loss_sum / batch_count as f64) as f32)
    }
}

impl<'a, M, O> Trainer for DiffusionTrainer<'a, M, O>
where
    M: Denoiser + ?Sized,
    O: Optimizer,
{
    fn state(&self) -> &TrainerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TrainerState {
        &mut self.state
    }

    fn train(&mut self) -> TrainResult<()> {
        let epochs = self.state.remaining_epochs();
        if epochs.is_empty() {
            info!(
                "Nothing to train: epoch cursor {} has reached {} epochs",
                self.state.epoch_iter, self.state.epochs
            );
            return Ok(());
        }

        if self.state.checkpoint && self.state.checkpoint_iter == 0 {
            return Err(TrainError::config(
                "checkpoint_iter must be positive when checkpointing is enabled",
            ));
        }

        let batches_per_epoch = self.batches_per_epoch();
        if batches_per_epoch == 0 {
            return Err(TrainError::NoBatches {
                samples: self.dataset.len(),
                batch_size: self.loader.batch_size(),
            });
        }

        // Continue the LR schedule where a resumed run left off
        self.lr_scheduler
            .set_step_count(epochs.start * batches_per_epoch);
        self.optimizer.set_learning_rate(self.lr_scheduler.current());

        info!(
            "Starting diffusion training: epochs {}..{} | {} batches/epoch (batch {}) | timesteps [0, {}) | device {:?}",
            epochs.start,
            epochs.end,
            batches_per_epoch,
            self.state.batch_size,
            self.state.max_timesteps,
            self.state.device
        );
        for obs in &mut self.observers {
            obs.on_train_start(epochs.start, epochs.end, batches_per_epoch);
        }

        for epoch in epochs.clone() {
            self.state.epoch_iter = epoch;
            for obs in &mut self.observers {
                obs.on_epoch_start(epoch);
            }

            let mean_loss = self.run_epoch(epoch)?;
            if !mean_loss.is_finite() {
                warn!("⚠️ Epoch {} mean loss is {}", epoch, mean_loss);
            }
            self.state.losses.push(mean_loss);
            for obs in &mut self.observers {
                obs.on_epoch_end(epoch, mean_loss);
            }

            if self.state.should_checkpoint(epoch) {
                self.checkpointer.save(epoch, &self.state.losses)?;
                for obs in &mut self.observers {
                    obs.on_checkpoint(epoch);
                }
            }
        }

        self.state.epoch_iter = epochs.end;
        for obs in &mut self.observers {
            obs.on_train_end();
        }
        info!(
            "Training finished at epoch {} (final loss {:.6})",
            self.state.epoch_iter,
            self.state.losses.last().copied().unwrap_or(f32::NAN)
        );
        Ok(())
    }
}
