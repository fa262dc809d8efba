//! Training observers - callbacks at epoch and batch boundaries

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Instant;
use tracing::info;

/// Callbacks invoked by the training loop. Every hook defaults to a no-op.
pub trait TrainingObserver {
    fn on_train_start(&mut self, _start_epoch: usize, _epochs: usize, _batches_per_epoch: usize) {}

    fn on_epoch_start(&mut self, _epoch: usize) {}

    fn on_batch_end(&mut self, _epoch: usize, _batch: usize, _loss: f32, _lr: f64) {}

    fn on_epoch_end(&mut self, _epoch: usize, _mean_loss: f32) {}

    fn on_checkpoint(&mut self, _epoch: usize) {}

    fn on_train_end(&mut self) {}
}

/// Logs epoch summaries through `tracing`.
pub struct LogObserver {
    epochs: usize,
    epoch_start: Instant,
    last_lr: f64,
}

impl LogObserver {
    pub fn new() -> Self {
        Self {
            epochs: 0,
            epoch_start: Instant::now(),
            last_lr: 0.0,
        }
    }
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingObserver for LogObserver {
    fn on_train_start(&mut self, _start_epoch: usize, epochs: usize, _batches_per_epoch: usize) {
        self.epochs = epochs;
    }

    fn on_epoch_start(&mut self, _epoch: usize) {
        self.epoch_start = Instant::now();
    }

    fn on_batch_end(&mut self, _epoch: usize, _batch: usize, _loss: f32, lr: f64) {
        self.last_lr = lr;
    }

    fn on_epoch_end(&mut self, epoch: usize, mean_loss: f32) {
        info!(
            "Epoch {:4}/{} | Loss: {:.6} | LR: {:.7} | {:.2}s",
            epoch,
            self.epochs,
            mean_loss,
            self.last_lr,
            self.epoch_start.elapsed().as_secs_f64()
        );
    }
}

/// Console progress bars: one for epochs, one for the batches of the
/// current epoch.
pub struct ProgressObserver {
    multi: MultiProgress,
    epoch_bar: Option<ProgressBar>,
    batch_bar: Option<ProgressBar>,
    batches_per_epoch: usize,
}

impl ProgressObserver {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            epoch_bar: None,
            batch_bar: None,
            batches_per_epoch: 0,
        }
    }

    fn style(template: &str) -> ProgressStyle {
        ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingObserver for ProgressObserver {
    fn on_train_start(&mut self, start_epoch: usize, epochs: usize, batches_per_epoch: usize) {
        let bar = self.multi.add(ProgressBar::new(epochs as u64));
        bar.set_style(Self::style(
            "Epoch [{bar:30}] {pos}/{len} {msg} ({elapsed_precise}, eta {eta})",
        ));
        bar.set_position(start_epoch as u64);
        self.epoch_bar = Some(bar);
        self.batches_per_epoch = batches_per_epoch;
    }

    fn on_epoch_start(&mut self, _epoch: usize) {
        let bar = self
            .multi
            .add(ProgressBar::new(self.batches_per_epoch as u64));
        bar.set_style(Self::style("Batch [{bar:30}] {pos}/{len} {msg}"));
        self.batch_bar = Some(bar);
    }

    fn on_batch_end(&mut self, _epoch: usize, _batch: usize, loss: f32, _lr: f64) {
        if let Some(bar) = &self.batch_bar {
            bar.set_message(format!("loss {loss:.5}"));
            bar.inc(1);
        }
    }

    fn on_epoch_end(&mut self, _epoch: usize, mean_loss: f32) {
        if let Some(bar) = self.batch_bar.take() {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
        if let Some(bar) = &self.epoch_bar {
            bar.set_message(format!("loss {mean_loss:.5}"));
            bar.inc(1);
        }
    }

    fn on_train_end(&mut self) {
        if let Some(bar) = self.epoch_bar.take() {
            bar.finish();
        }
    }
}
