//! Learning-rate schedules

/// Per-optimizer-step learning-rate schedule.
pub trait LrScheduler {
    /// Rate for the next optimizer step.
    fn current(&self) -> f64;

    /// Advance one optimizer step and return the new rate.
    fn step(&mut self) -> f64;

    fn step_count(&self) -> usize;

    /// Jump to an absolute step (used when resuming).
    fn set_step_count(&mut self, steps: usize);
}

fn warmup_factor(step: usize, warmup_steps: usize) -> Option<f64> {
    (step < warmup_steps).then(|| step as f64 / warmup_steps as f64)
}

/// Linear warmup from 0 to `lr`, then constant.
#[derive(Debug, Clone)]
pub struct ConstantWithWarmup {
    lr: f64,
    warmup_steps: usize,
    step: usize,
}

impl ConstantWithWarmup {
    pub fn new(lr: f64, warmup_steps: usize) -> Self {
        Self {
            lr,
            warmup_steps,
            step: 0,
        }
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        self.lr * warmup_factor(step, self.warmup_steps).unwrap_or(1.0)
    }
}

impl LrScheduler for ConstantWithWarmup {
    fn current(&self) -> f64 {
        self.lr_at(self.step)
    }

    fn step(&mut self) -> f64 {
        self.step += 1;
        self.current()
    }

    fn step_count(&self) -> usize {
        self.step
    }

    fn set_step_count(&mut self, steps: usize) {
        self.step = steps;
    }
}

/// Linear warmup, then half-cosine decay from `lr` to `min_lr` over the
/// remaining `total_steps - warmup_steps` steps.
#[derive(Debug, Clone)]
pub struct WarmupCosine {
    lr: f64,
    min_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    step: usize,
}

impl WarmupCosine {
    pub fn new(lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            lr,
            min_lr: 0.0,
            warmup_steps,
            total_steps,
            step: 0,
        }
    }

    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        if let Some(f) = warmup_factor(step, self.warmup_steps) {
            return self.lr * f;
        }
        let decay_steps = self.total_steps.saturating_sub(self.warmup_steps);
        if decay_steps == 0 {
            return self.min_lr;
        }
        let progress = ((step - self.warmup_steps) as f64 / decay_steps as f64).clamp(0.0, 1.0);
        let cosine = (progress * std::f64::consts::PI).cos();
        let decay = 0.5 * (1.0 + cosine);
        self.min_lr + (self.lr - self.min_lr) * decay
    }
}

impl LrScheduler for WarmupCosine {
    fn current(&self) -> f64 {
        self.lr_at(self.step)
    }

    fn step(&mut self) -> f64 {
        self.step += 1;
        self.current()
    }

    fn step_count(&self) -> usize {
        self.step
    }

    fn set_step_count(&mut self, steps: usize) {
        self.step = steps;
    }
}
