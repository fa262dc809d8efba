use candle_core::{DType, Device, Result, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap, SGD};
use crater_engine::{CraterDenoiser, DdpmScheduler, DdpmSchedulerConfig, Denoiser, DenoiserConfig};
use crater_train::data::TensorDataset;
use crater_train::train::{
    Checkpointer, ConstantWithWarmup, FileCheckpointer, LrScheduler, NoiseSource,
    TrainingObserver,
};
use crater_train::{
    DiffusionTrainer, TrainError, TrainResult, Trainer, TrainerComponents, TrainingConfig,
};
use std::cell::RefCell;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

struct ZeroDenoiser;

impl Denoiser for ZeroDenoiser {
    fn predict_noise(&self, x: &Tensor, _t: &Tensor, _body: &Tensor, _radius: &Tensor) -> Result<Tensor> {
        x.zeros_like()
    }
}

/// Records every call's inputs, predicts zeros.
#[derive(Default)]
struct RecordingDenoiser {
    timesteps: RefCell<Vec<Vec<i64>>>,
    shapes: RefCell<Vec<Vec<usize>>>,
    body_dtypes: RefCell<Vec<DType>>,
    radius_shapes: RefCell<Vec<Vec<usize>>>,
}

impl Denoiser for RecordingDenoiser {
    fn predict_noise(&self, x: &Tensor, t: &Tensor, body: &Tensor, radius: &Tensor) -> Result<Tensor> {
        self.timesteps.borrow_mut().push(t.to_vec1::<i64>()?);
        self.shapes.borrow_mut().push(x.dims().to_vec());
        self.body_dtypes.borrow_mut().push(body.dtype());
        self.radius_shapes.borrow_mut().push(radius.dims().to_vec());
        x.zeros_like()
    }
}

/// One trainable scalar: `pred = w * x`.
struct ScaleDenoiser {
    w: Var,
}

impl Denoiser for ScaleDenoiser {
    fn predict_noise(&self, x: &Tensor, _t: &Tensor, _body: &Tensor, _radius: &Tensor) -> Result<Tensor> {
        x.broadcast_mul(self.w.as_tensor())
    }
}

struct NanDenoiser;

impl Denoiser for NanDenoiser {
    fn predict_noise(&self, x: &Tensor, _t: &Tensor, _body: &Tensor, _radius: &Tensor) -> Result<Tensor> {
        Tensor::full(f32::NAN, x.dims(), x.device())
    }
}

struct WrongShapeDenoiser;

impl Denoiser for WrongShapeDenoiser {
    fn predict_noise(&self, x: &Tensor, _t: &Tensor, _body: &Tensor, _radius: &Tensor) -> Result<Tensor> {
        Tensor::zeros((x.dim(0)?, 2), DType::F32, x.device())
    }
}

#[derive(Default)]
struct RecordingCheckpointer {
    /// (epoch, loss history length at save time)
    saves: Vec<(usize, usize)>,
}

impl Checkpointer for RecordingCheckpointer {
    fn save(&mut self, epoch: usize, losses: &[f32]) -> TrainResult<()> {
        self.saves.push((epoch, losses.len()));
        Ok(())
    }
}

struct FailingCheckpointer;

impl Checkpointer for FailingCheckpointer {
    fn save(&mut self, epoch: usize, _losses: &[f32]) -> TrainResult<()> {
        Err(TrainError::checkpoint(format!("disk full at epoch {epoch}")))
    }
}

#[derive(Default)]
struct ObserverLog {
    epochs: Vec<usize>,
    /// Batch losses per observed epoch
    batch_losses: Vec<Vec<f32>>,
    /// Learning rate reported with each batch
    batch_lrs: Vec<f64>,
    epoch_means: Vec<f32>,
    checkpoints: Vec<usize>,
}

struct RecordingObserver<'a> {
    log: &'a RefCell<ObserverLog>,
}

impl TrainingObserver for RecordingObserver<'_> {
    fn on_epoch_start(&mut self, epoch: usize) {
        let mut log = self.log.borrow_mut();
        log.epochs.push(epoch);
        log.batch_losses.push(Vec::new());
    }

    fn on_batch_end(&mut self, _epoch: usize, _batch: usize, loss: f32, lr: f64) {
        let mut log = self.log.borrow_mut();
        log.batch_lrs.push(lr);
        if let Some(losses) = log.batch_losses.last_mut() {
            losses.push(loss);
        }
    }

    fn on_epoch_end(&mut self, _epoch: usize, mean_loss: f32) {
        self.log.borrow_mut().epoch_means.push(mean_loss);
    }

    fn on_checkpoint(&mut self, epoch: usize) {
        self.log.borrow_mut().checkpoints.push(epoch);
    }
}

struct ZeroNoise;

impl NoiseSource for ZeroNoise {
    fn sample_noise(&mut self, like: &Tensor) -> Result<Tensor> {
        like.zeros_like()
    }

    fn sample_timesteps(&mut self, batch: usize, _max_timesteps: usize) -> Result<Tensor> {
        Tensor::zeros(batch, DType::I64, &Device::Cpu)
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

fn dataset(samples: usize) -> Result<TensorDataset> {
    let images = Tensor::randn(0f32, 1f32, (samples, 1, 4, 4), &Device::Cpu)?;
    let body = (0..samples as u32).map(|i| i % 3).collect();
    let radius = (0..samples).map(|i| 0.5 + i as f32).collect();
    TensorDataset::new(images, body, radius).map_err(|e| candle_core::Error::Msg(e.to_string()))
}

fn config(epochs: usize) -> TrainingConfig {
    TrainingConfig {
        epochs,
        batch_size: 5,
        checkpoint: false,
        learning_rate: 0.05,
        learning_rate_warmup_steps: 0,
        seed: Some(7),
        ..Default::default()
    }
}

struct Rig<C> {
    dataset: TensorDataset,
    scheduler: DdpmScheduler,
    lr: ConstantWithWarmup,
    checkpointer: C,
    optimizer: SGD,
}

impl<C: Checkpointer> Rig<C> {
    fn new(samples: usize, checkpointer: C) -> anyhow::Result<Self> {
        Self::with_vars(samples, checkpointer, Vec::new())
    }

    fn with_vars(samples: usize, checkpointer: C, vars: Vec<Var>) -> anyhow::Result<Self> {
        Ok(Self {
            dataset: dataset(samples)?,
            scheduler: DdpmScheduler::new(DdpmSchedulerConfig::default())?,
            lr: ConstantWithWarmup::new(0.05, 0),
            checkpointer,
            optimizer: SGD::new(vars, 0.05)?,
        })
    }

    fn trainer<'a, M: Denoiser>(
        &'a mut self,
        model: &'a M,
        config: &TrainingConfig,
    ) -> TrainResult<DiffusionTrainer<'a, M, SGD>> {
        let components = TrainerComponents {
            model,
            optimizer: &mut self.optimizer,
            dataset: &self.dataset,
            noise_scheduler: &self.scheduler,
            lr_scheduler: &mut self.lr,
            checkpointer: &mut self.checkpointer,
        };
        DiffusionTrainer::new(components, Device::Cpu, config)
    }
}

// ---------------------------------------------------------------------------
// Epoch and checkpoint cadence
// ---------------------------------------------------------------------------

#[test]
fn test_checkpoint_cadence_skips_epoch_zero() -> anyhow::Result<()> {
    let log = RefCell::new(ObserverLog::default());
    let mut rig = Rig::new(10, RecordingCheckpointer::default())?;
    let model = ZeroDenoiser;
    let cfg = TrainingConfig {
        checkpoint: true,
        checkpoint_iter: 1,
        ..config(3)
    };

    let mut trainer = rig
        .trainer(&model, &cfg)?
        .with_observer(Box::new(RecordingObserver { log: &log }));
    trainer.train()?;
    assert_eq!(trainer.state().epoch_iter, 3);
    drop(trainer);

    // Saved after the epoch's loss was appended
    assert_eq!(rig.checkpointer.saves, vec![(1, 2), (2, 3)]);
    assert_eq!(log.borrow().checkpoints, vec![1, 2]);
    Ok(())
}

#[test]
fn test_checkpoint_every_second_epoch() -> anyhow::Result<()> {
    let mut rig = Rig::new(5, RecordingCheckpointer::default())?;
    let model = ZeroDenoiser;
    let cfg = TrainingConfig {
        checkpoint: true,
        checkpoint_iter: 2,
        ..config(7)
    };
    rig.trainer(&model, &cfg)?.train()?;
    let epochs: Vec<usize> = rig.checkpointer.saves.iter().map(|(e, _)| *e).collect();
    assert_eq!(epochs, vec![2, 4, 6]);
    Ok(())
}

#[test]
fn test_checkpoint_disabled_never_saves() -> anyhow::Result<()> {
    let mut rig = Rig::new(10, RecordingCheckpointer::default())?;
    let model = ZeroDenoiser;
    let cfg = TrainingConfig {
        checkpoint: false,
        checkpoint_iter: 1,
        ..config(2)
    };
    let mut trainer = rig.trainer(&model, &cfg)?;
    trainer.train()?;
    assert_eq!(trainer.state().losses.len(), 2);
    drop(trainer);
    assert!(rig.checkpointer.saves.is_empty());
    Ok(())
}

#[test]
fn test_resumed_cursor_runs_remaining_epochs_only() -> anyhow::Result<()> {
    let log = RefCell::new(ObserverLog::default());
    let mut rig = Rig::new(10, RecordingCheckpointer::default())?;
    let model = ZeroDenoiser;

    let mut trainer = rig
        .trainer(&model, &config(7))?
        .with_observer(Box::new(RecordingObserver { log: &log }));
    trainer.state_mut().epoch_iter = 5;
    trainer.state_mut().losses = vec![1.0; 5];
    trainer.train()?;

    assert_eq!(log.borrow().epochs, vec![5, 6]);
    assert_eq!(trainer.state().losses.len(), 7);
    assert_eq!(trainer.state().epoch_iter, 7);
    Ok(())
}

#[test]
fn test_second_train_call_is_a_no_op() -> anyhow::Result<()> {
    let log = RefCell::new(ObserverLog::default());
    let mut rig = Rig::new(10, RecordingCheckpointer::default())?;
    let model = ZeroDenoiser;

    let mut trainer = rig
        .trainer(&model, &config(2))?
        .with_observer(Box::new(RecordingObserver { log: &log }));
    trainer.train()?;
    trainer.train()?;

    assert_eq!(log.borrow().epochs, vec![0, 1]);
    assert_eq!(trainer.state().losses.len(), 2);
    Ok(())
}

#[test]
fn test_checkpoint_enabled_after_construction_needs_interval() -> anyhow::Result<()> {
    let mut rig = Rig::new(10, RecordingCheckpointer::default())?;
    let model = ZeroDenoiser;
    let cfg = TrainingConfig {
        checkpoint: false,
        checkpoint_iter: 0,
        ..config(2)
    };
    let mut trainer = rig.trainer(&model, &cfg)?;
    trainer.state_mut().checkpoint = true;

    let err = trainer.train().err();
    assert!(matches!(err, Some(TrainError::Config(_))));
    assert_eq!(trainer.state().epoch_iter, 0);
    assert!(trainer.state().losses.is_empty());
    drop(trainer);
    assert!(rig.checkpointer.saves.is_empty());
    Ok(())
}

#[test]
fn test_resumed_run_continues_lr_schedule() -> anyhow::Result<()> {
    let log = RefCell::new(ObserverLog::default());
    let mut rig = Rig::new(10, RecordingCheckpointer::default())?;
    rig.lr = ConstantWithWarmup::new(0.05, 100);
    let model = ZeroDenoiser;

    let mut trainer = rig
        .trainer(&model, &config(7))?
        .with_observer(Box::new(RecordingObserver { log: &log }));
    assert_eq!(trainer.batches_per_epoch(), 2);
    trainer.state_mut().epoch_iter = 5;
    trainer.train()?;
    drop(trainer);

    // Epochs 5 and 6 at 2 batches each: steps 10..14
    assert_eq!(rig.lr.step_count(), 14);
    assert!((rig.optimizer.learning_rate() - rig.lr.lr_at(14)).abs() < 1e-12);

    // Each batch reports the rate its own update used
    let expected: Vec<f64> = (10..14).map(|s| rig.lr.lr_at(s)).collect();
    let log = log.borrow();
    assert_eq!(log.batch_lrs.len(), expected.len());
    for (got, want) in log.batch_lrs.iter().zip(&expected) {
        assert!((got - want).abs() < 1e-12, "{got} vs {want}");
    }
    Ok(())
}

#[test]
fn test_non_finite_losses_are_recorded() -> anyhow::Result<()> {
    let mut rig = Rig::new(10, RecordingCheckpointer::default())?;
    let model = NanDenoiser;
    let mut trainer = rig.trainer(&model, &config(3))?;
    trainer.train()?;

    let losses = &trainer.state().losses;
    assert_eq!(losses.len(), 3);
    assert!(losses.iter().all(|l| l.is_nan()));
    assert_eq!(trainer.state().epoch_iter, 3);
    Ok(())
}

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

#[test]
fn test_partial_batch_is_dropped() -> anyhow::Result<()> {
    let log = RefCell::new(ObserverLog::default());
    let mut rig = Rig::new(12, RecordingCheckpointer::default())?;
    let model = RecordingDenoiser::default();

    let mut trainer = rig
        .trainer(&model, &config(2))?
        .with_observer(Box::new(RecordingObserver { log: &log }));
    assert_eq!(trainer.batches_per_epoch(), 2);
    trainer.train()?;
    drop(trainer);

    assert!(log.borrow().batch_losses.iter().all(|b| b.len() == 2));
    let shapes = model.shapes.borrow();
    assert_eq!(shapes.len(), 4);
    assert!(shapes.iter().all(|s| s == &[5, 1, 4, 4]));
    Ok(())
}

#[test]
fn test_conditioning_is_cast_for_the_model() -> anyhow::Result<()> {
    let mut rig = Rig::new(5, RecordingCheckpointer::default())?;
    let model = RecordingDenoiser::default();
    rig.trainer(&model, &config(1))?.train()?;

    assert_eq!(model.body_dtypes.borrow().as_slice(), &[DType::I64]);
    assert_eq!(model.radius_shapes.borrow()[0], vec![5, 1]);
    Ok(())
}

#[test]
fn test_dataset_smaller_than_batch_fails() -> anyhow::Result<()> {
    let mut rig = Rig::new(3, RecordingCheckpointer::default())?;
    let model = ZeroDenoiser;
    let mut trainer = rig.trainer(&model, &config(2))?;
    assert_eq!(trainer.batches_per_epoch(), 0);

    let err = trainer.train().err();
    assert!(matches!(
        err,
        Some(TrainError::NoBatches {
            samples: 3,
            batch_size: 5
        })
    ));
    assert!(trainer.state().losses.is_empty());
    Ok(())
}

// ---------------------------------------------------------------------------
// Noise and loss
// ---------------------------------------------------------------------------

#[test]
fn test_zero_model_zero_noise_gives_zero_loss() -> anyhow::Result<()> {
    let log = RefCell::new(ObserverLog::default());
    let mut rig = Rig::new(10, RecordingCheckpointer::default())?;
    let model = ZeroDenoiser;

    let mut trainer = rig
        .trainer(&model, &config(1))?
        .with_noise_source(Box::new(ZeroNoise))
        .with_observer(Box::new(RecordingObserver { log: &log }));
    trainer.train()?;

    assert_eq!(log.borrow().batch_losses[0], vec![0.0, 0.0]);
    assert_eq!(trainer.state().losses, vec![0.0]);
    Ok(())
}

#[test]
fn test_timesteps_drawn_below_configured_max() -> anyhow::Result<()> {
    let mut rig = Rig::new(50, RecordingCheckpointer::default())?;
    let model = RecordingDenoiser::default();
    let cfg = TrainingConfig {
        max_timesteps: 10,
        ..config(4)
    };
    rig.trainer(&model, &cfg)?.train()?;

    let timesteps = model.timesteps.borrow();
    assert_eq!(timesteps.len(), 40);
    for t in timesteps.iter() {
        assert_eq!(t.len(), 5);
        assert!(t.iter().all(|v| (0..10).contains(v)), "{t:?}");
    }
    Ok(())
}

#[test]
fn test_noise_batch_matches_clean_shape() -> anyhow::Result<()> {
    let mut rig = Rig::new(5, RecordingCheckpointer::default())?;
    let model = ZeroDenoiser;
    let mut trainer = rig.trainer(&model, &config(1))?;

    let clean = Tensor::randn(0f32, 1f32, (5, 1, 4, 4), &Device::Cpu)?;
    let noised = trainer.noise_batch(&clean)?;
    assert_eq!(noised.noise.dims(), clean.dims());
    assert_eq!(noised.noisy.dims(), clean.dims());
    assert_eq!(noised.timesteps.dims(), &[5]);
    Ok(())
}

#[test]
fn test_epoch_loss_is_mean_of_batch_losses() -> anyhow::Result<()> {
    let log = RefCell::new(ObserverLog::default());
    let mut rig = Rig::new(20, RecordingCheckpointer::default())?;
    let model = ZeroDenoiser;

    let mut trainer = rig
        .trainer(&model, &config(3))?
        .with_observer(Box::new(RecordingObserver { log: &log }));
    trainer.train()?;

    let log = log.borrow();
    assert_eq!(trainer.state().losses, log.epoch_means);
    for (batches, mean) in log.batch_losses.iter().zip(&trainer.state().losses) {
        assert_eq!(batches.len(), 4);
        let expected = batches.iter().sum::<f32>() / batches.len() as f32;
        assert!((expected - mean).abs() < 1e-5, "{expected} vs {mean}");
        // Zero prediction against standard-normal noise
        assert!(*mean > 0.3 && *mean < 3.0);
    }
    Ok(())
}

#[test]
fn test_optimizer_updates_parameters() -> anyhow::Result<()> {
    let w = Var::from_tensor(&Tensor::new(&[0f32], &Device::Cpu)?)?;
    let model = ScaleDenoiser { w: w.clone() };
    let mut rig = Rig::with_vars(10, RecordingCheckpointer::default(), vec![w.clone()])?;

    rig.trainer(&model, &config(2))?.train()?;

    let updated = w.as_tensor().to_vec1::<f32>()?[0];
    assert!(updated != 0.0, "weight was never stepped");
    assert!(updated.is_finite());
    Ok(())
}

#[test]
fn test_prediction_shape_mismatch_is_an_error() -> anyhow::Result<()> {
    let mut rig = Rig::new(5, RecordingCheckpointer::default())?;
    let model = WrongShapeDenoiser;
    let mut trainer = rig.trainer(&model, &config(1))?;
    let err = trainer.train().err();
    assert!(matches!(err, Some(TrainError::ShapeMismatch { .. })));
    Ok(())
}

#[test]
fn test_checkpoint_failure_propagates() -> anyhow::Result<()> {
    let mut rig = Rig::new(5, FailingCheckpointer)?;
    let model = ZeroDenoiser;
    let cfg = TrainingConfig {
        checkpoint: true,
        checkpoint_iter: 1,
        ..config(3)
    };
    let mut trainer = rig.trainer(&model, &cfg)?;
    let err = trainer.train().err();
    assert!(matches!(err, Some(TrainError::Checkpoint(_))));
    // Epochs 0 and 1 ran; the failing save at epoch 1 stopped the loop
    assert_eq!(trainer.state().losses.len(), 2);
    assert_eq!(trainer.state().epoch_iter, 1);
    Ok(())
}

#[test]
fn test_max_timesteps_beyond_scheduler_is_rejected() -> anyhow::Result<()> {
    let mut rig = Rig::new(5, RecordingCheckpointer::default())?;
    let model = ZeroDenoiser;
    let cfg = TrainingConfig {
        max_timesteps: 2000,
        ..config(1)
    };
    let result = rig.trainer(&model, &cfg);
    assert!(matches!(result, Err(TrainError::Config(_))));
    Ok(())
}

// ---------------------------------------------------------------------------
// End to end with the real denoiser
// ---------------------------------------------------------------------------

#[test]
fn test_denoiser_checkpoints_and_resumes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let device = Device::Cpu;
    let data = dataset(10)?;
    let scheduler = DdpmScheduler::new(DdpmSchedulerConfig::default())?;
    let model_config = DenoiserConfig {
        in_channels: 1,
        hidden_channels: 8,
        num_blocks: 1,
        num_groups: 4,
        num_bodies: 3,
        time_embed_dim: 16,
    };
    let cfg = TrainingConfig {
        checkpoint: true,
        checkpoint_iter: 1,
        checkpoint_path: dir.path().to_string_lossy().into_owned(),
        learning_rate: 1e-3,
        ..config(2)
    };

    let varmap = VarMap::new();
    let model = CraterDenoiser::load(model_config, VarBuilder::from_varmap(&varmap, DType::F32, &device))?;
    let mut optimizer = AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: cfg.learning_rate,
            ..Default::default()
        },
    )?;
    let mut lr = ConstantWithWarmup::new(cfg.learning_rate, 0);
    let mut checkpointer = FileCheckpointer::new(dir.path(), varmap.clone());
    {
        let mut trainer = DiffusionTrainer::new(
            TrainerComponents {
                model: &model,
                optimizer: &mut optimizer,
                dataset: &data,
                noise_scheduler: &scheduler,
                lr_scheduler: &mut lr,
                checkpointer: &mut checkpointer,
            },
            device.clone(),
            &cfg,
        )?;
        trainer.train()?;
        assert!(trainer.state().losses.iter().all(|l| l.is_finite()));
    }
    assert!(dir.path().join("epoch_00001.safetensors").exists());
    assert!(!dir.path().join("epoch_00000.safetensors").exists());

    // Fresh process: new variables, restored from disk
    let varmap = VarMap::new();
    let model = CraterDenoiser::load(model_config, VarBuilder::from_varmap(&varmap, DType::F32, &device))?;
    let mut checkpointer = FileCheckpointer::new(dir.path(), varmap.clone());
    let point = checkpointer.load_latest()?.expect("checkpoint written");
    assert_eq!(point.epoch, 1);
    assert_eq!(point.losses.len(), 2);

    let mut optimizer = AdamW::new(varmap.all_vars(), ParamsAdamW::default())?;
    let cfg = TrainingConfig { epochs: 3, ..cfg };
    let mut trainer = DiffusionTrainer::new(
        TrainerComponents {
            model: &model,
            optimizer: &mut optimizer,
            dataset: &data,
            noise_scheduler: &scheduler,
            lr_scheduler: &mut lr,
            checkpointer: &mut checkpointer,
        },
        device,
        &cfg,
    )?;
    trainer.state_mut().restore(&point);
    assert_eq!(trainer.state().epoch_iter, 2);
    trainer.train()?;
    assert_eq!(trainer.state().losses.len(), 3);
    assert_eq!(trainer.state().losses[..2], point.losses[..]);
    Ok(())
}
