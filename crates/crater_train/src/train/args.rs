//! Training entry point - CLI arguments and wiring

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use clap::{Args, ValueEnum};
use crater_engine::{CraterDenoiser, DdpmScheduler, DdpmSchedulerConfig, DenoiserConfig};
use std::path::PathBuf;
use tracing::{info, warn};

use super::checkpoint::FileCheckpointer;
use super::diffusion::{DiffusionTrainer, TrainerComponents};
use super::lr::{ConstantWithWarmup, LrScheduler, WarmupCosine};
use super::observer::{LogObserver, ProgressObserver};
use super::Trainer;
use crate::config::TrainingConfig;
use crate::data::{load_image_folder, Dataset, TensorDataset};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrSchedule {
    /// Warmup, then cosine decay to zero over the whole run
    Cosine,
    /// Warmup, then constant
    Constant,
}

/// Training configuration from command line arguments
#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Dataset: a .safetensors file or an image folder with manifest.json
    #[arg(long, required = true)]
    pub data: PathBuf,

    /// JSON training config; missing keys take their defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// JSON denoiser config
    #[arg(long)]
    pub model_config: Option<PathBuf>,

    /// JSON noise scheduler config
    #[arg(long)]
    pub scheduler_config: Option<PathBuf>,

    #[arg(long)]
    pub epochs: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub learning_rate: Option<f64>,

    #[arg(long)]
    pub checkpoint_path: Option<String>,

    #[arg(long)]
    pub checkpoint_iter: Option<usize>,

    #[arg(long, action)]
    pub no_checkpoint: bool,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Resume from the latest checkpoint in checkpoint_path
    #[arg(long, action)]
    pub resume: bool,

    #[arg(long, action)]
    pub cpu: bool,

    #[arg(long, value_enum, default_value_t = LrSchedule::Cosine)]
    pub lr_schedule: LrSchedule,

    /// Image folders only: square resize target
    #[arg(long, default_value_t = 64)]
    pub image_size: usize,

    /// Image folders only: 1 (grayscale) or 3 (RGB)
    #[arg(long, default_value_t = 1)]
    pub channels: usize,

    #[arg(long, action)]
    pub no_progress: bool,
}

impl TrainArgs {
    /// File config (or defaults) with command line overrides applied.
    pub fn training_config(&self) -> Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {:?}", path))?,
            None => TrainingConfig::default(),
        };
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.learning_rate {
            config.learning_rate = v;
        }
        if let Some(v) = &self.checkpoint_path {
            config.checkpoint_path = v.clone();
        }
        if let Some(v) = self.checkpoint_iter {
            config.checkpoint_iter = v;
        }
        if self.no_checkpoint {
            config.checkpoint = false;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        Ok(config)
    }
}

fn load_dataset(args: &TrainArgs) -> Result<TensorDataset> {
    let path = args.data.as_path();
    if !path.exists() {
        anyhow::bail!("Data not found at {:?}", path);
    }
    let dataset = if path.is_dir() {
        load_image_folder(path, args.image_size, args.channels)?
    } else {
        TensorDataset::from_safetensors(path)?
    };
    if dataset.is_empty() {
        anyhow::bail!("❌ Training dataset is empty: {:?}", path);
    }
    Ok(dataset)
}

/// Main training function
pub fn run(args: TrainArgs) -> Result<()> {
    info!("--- Crater Diffusion Training ---");
    let config = args.training_config()?;
    config.validate()?;
    info!(
        "Hyperparams: LR={}, Warmup={}, Epochs={}, Batch={}, Timesteps={}",
        config.learning_rate,
        config.learning_rate_warmup_steps,
        config.epochs,
        config.batch_size,
        config.max_timesteps
    );

    let device = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0).unwrap_or(Device::Cpu)
    };
    info!("Device initialized: {:?}", device);

    let dataset = load_dataset(&args)?;
    let image_dims = dataset.image_dims().to_vec();
    info!("Data Loaded. {} samples of {:?}", dataset.len(), image_dims);

    let mut model_config = match &args.model_config {
        Some(path) => DenoiserConfig::from_json_file(path)
            .with_context(|| format!("Failed to load model config {:?}", path))?,
        None => DenoiserConfig::default(),
    };
    if model_config.in_channels != image_dims[0] {
        warn!(
            "Model in_channels {} does not match data ({}); using the data's",
            model_config.in_channels, image_dims[0]
        );
        model_config.in_channels = image_dims[0];
    }
    let scheduler_config = match &args.scheduler_config {
        Some(path) => DdpmSchedulerConfig::from_json_file(path)
            .with_context(|| format!("Failed to load scheduler config {:?}", path))?,
        None => DdpmSchedulerConfig::default(),
    };
    let noise_scheduler = DdpmScheduler::new(scheduler_config)?;
    info!("Noise scheduler: {:?}", noise_scheduler.config());

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = CraterDenoiser::load(model_config, vb)?;
    info!(
        "Model initialized. Varmap Key count: {}",
        varmap.all_vars().len()
    );

    let mut checkpointer = FileCheckpointer::new(&config.checkpoint_path, varmap.clone());
    let resume_point = if args.resume {
        let point = checkpointer.load_latest()?;
        if point.is_none() {
            warn!(
                "⚠️ No checkpoint found in {:?}. Starting fresh.",
                checkpointer.dir()
            );
        }
        point
    } else {
        None
    };

    let mut optimizer = AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: config.learning_rate,
            ..Default::default()
        },
    )?;

    let batches_per_epoch = dataset.len() / config.batch_size;
    let total_steps = batches_per_epoch * config.epochs;
    let mut lr_scheduler: Box<dyn LrScheduler> = match args.lr_schedule {
        LrSchedule::Cosine => Box::new(WarmupCosine::new(
            config.learning_rate,
            config.learning_rate_warmup_steps,
            total_steps,
        )),
        LrSchedule::Constant => Box::new(ConstantWithWarmup::new(
            config.learning_rate,
            config.learning_rate_warmup_steps,
        )),
    };

    {
        let components = TrainerComponents {
            model: &model,
            optimizer: &mut optimizer,
            dataset: &dataset,
            noise_scheduler: &noise_scheduler,
            lr_scheduler: lr_scheduler.as_mut(),
            checkpointer: &mut checkpointer,
        };
        let mut trainer = DiffusionTrainer::new(components, device, &config)?
            .with_observer(Box::new(LogObserver::new()));
        if !args.no_progress {
            trainer = trainer.with_observer(Box::new(ProgressObserver::new()));
        }
        if let Some(point) = &resume_point {
            trainer.state_mut().restore(point);
            info!("Resuming from Epoch {}", trainer.state().epoch_iter);
        }

        trainer.train()?;
    }

    info!("Training complete. Saving final model...");
    let final_path = checkpointer.save_weights("model.safetensors")?;
    info!("✅ Saved {:?} (final LR {:.3e})", final_path, optimizer.learning_rate());
    config.save_json(checkpointer.dir().join("training_config.json"))?;
    Ok(())
}
