use burn::module::{AutodiffModule, Module};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Int, Tensor};
use cifar_dataset::{Augmenter, BatchIter, ImageSet};
use clap::{Parser, ValueEnum};
use models::{CifarCnn, CifarCnnConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::callbacks::{EarlyStopping, ReduceLrOnPlateau, StopDecision};
use crate::config::TrainConfig;
use crate::eval::evaluate;

#[derive(ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[value(name = "ndarray")]
    NdArray,
    Wgpu,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::NdArray => "ndarray",
            BackendKind::Wgpu => "wgpu",
        }
    }
}

#[derive(Parser, Debug, Default)]
#[command(
    name = "train",
    about = "Train the CIFAR-10 CNN and export it as a TF.js layers-model bundle"
)]
pub struct TrainArgs {
    /// Backend to use (ndarray, or wgpu if built with backend-wgpu). Default: ndarray.
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
    /// Maximum number of epochs. Default: 30.
    #[arg(long)]
    pub epochs: Option<usize>,
    /// Batch size. Default: 128.
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Initial learning rate. Default: 0.001.
    #[arg(long)]
    pub lr: Option<f64>,
    /// Directory holding (or receiving) cifar-10-batches-bin. Default: data.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Native checkpoint path. Default: cifar10_model.bin.
    #[arg(long)]
    pub checkpoint_out: Option<PathBuf>,
    /// TF.js bundle directory. Default: cifar10_tfjs_model.
    #[arg(long)]
    pub export_dir: Option<PathBuf>,
    /// Seed for weight init, shuffling and augmentation (random when unset).
    #[arg(long)]
    pub seed: Option<u64>,
    /// Train a tiny model on a generated stand-in set instead of CIFAR-10.
    #[arg(long)]
    pub synthetic: bool,
    /// Config file (overrides CIFAR10_TRAIN_CONFIG and ./cifar10-train.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Fails when the requested backend was not compiled in.
pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            println!("note: built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

/// Saves with `BinFileRecorder`; returns the path actually written (extension forced to `.bin`).
pub fn save_checkpoint<B: Backend>(model: &CifarCnn<B>, path: &Path) -> Result<PathBuf, RecorderError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| RecorderError::Unknown(e.to_string()))?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model.clone().save_file(path.to_path_buf(), &recorder)?;
    Ok(path.with_extension("bin"))
}

pub fn load_checkpoint<B: Backend>(
    cfg: &CifarCnnConfig,
    path: &Path,
    device: &B::Device,
) -> Result<CifarCnn<B>, RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    CifarCnn::<B>::new(cfg, device).load_file(path.to_path_buf(), &recorder, device)
}

#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("training set is empty")]
    EmptyTrainSet,
    #[error("validation set is empty")]
    EmptyValidSet,
    #[error("tensor readback failed: {0}")]
    Tensor(String),
}

/// Metrics of one epoch, as printed on the epoch line.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochLog {
    /// One-based.
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    /// Learning rate the epoch ran with.
    pub lr: f64,
}

pub struct FitOutcome<B: AutodiffBackend> {
    pub model: CifarCnn<B>,
    pub history: Vec<EpochLog>,
    pub stopped_early: bool,
    /// Zero-based epoch whose weights the model carries after a restore.
    pub restored_epoch: Option<usize>,
    pub final_lr: f64,
}

fn correct_count<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> i64 {
    let preds = logits.argmax(1).squeeze::<1>(1);
    preds.equal(targets).int().sum().into_scalar().elem::<i64>()
}

/// Run one pass over `set` with gradient steps; returns (mean loss, accuracy).
fn train_epoch<B: AutodiffBackend, O: Optimizer<CifarCnn<B>, B>>(
    model: &mut CifarCnn<B>,
    optim: &mut O,
    iter: &mut BatchIter<'_>,
    lr: f64,
    device: &B::Device,
) -> (f64, f64) {
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut loss_sum = 0.0f64;
    let mut correct = 0i64;
    let mut seen = 0usize;
    while let Some(batch) = iter.next_batch::<B>(device) {
        let n = batch.targets.dims()[0];
        let logits = model.forward(batch.images);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
        correct += correct_count(logits.detach(), batch.targets);
        loss_sum += loss.clone().detach().into_scalar().elem::<f64>() * n as f64;
        seen += n;

        let grads = GradientsParams::from_grads(loss.backward(), &*model);
        *model = optim.step(lr, model.clone(), grads);
    }
    let seen = seen.max(1) as f64;
    (loss_sum / seen, correct as f64 / seen)
}

/// Fit `model` on `train`, validating on `valid` after every epoch.
///
/// Each epoch reshuffles and re-augments the training set; the plateau control may lower
/// the learning rate for the next epoch and early stopping may end the run, restoring the
/// best epoch's weights.
pub fn fit<B: AutodiffBackend>(
    mut model: CifarCnn<B>,
    train: &ImageSet,
    valid: &ImageSet,
    cfg: &TrainConfig,
    device: &B::Device,
) -> Result<FitOutcome<B>, TrainError> {
    if train.is_empty() {
        return Err(TrainError::EmptyTrainSet);
    }
    if valid.is_empty() {
        return Err(TrainError::EmptyValidSet);
    }

    let mut optim = AdamConfig::new().with_epsilon(1e-7).init::<B, CifarCnn<B>>();
    let mut plateau = ReduceLrOnPlateau::new(cfg.plateau.clone());
    let mut stopper = EarlyStopping::<CifarCnn<B>>::new(cfg.early_stopping.clone());
    let mut augmenter = (!cfg.augment.is_identity()).then(|| {
        let aug = match cfg.seed {
            Some(seed) => cfg.augment.clone().with_seed(seed ^ 0x5eed),
            None => cfg.augment.clone(),
        };
        Augmenter::new(aug)
    });

    let mut lr = cfg.learning_rate;
    let mut history = Vec::new();
    let mut stopped_early = false;
    let mut restored_epoch = None;

    for epoch in 0..cfg.epochs {
        println!("Epoch {}/{}", epoch + 1, cfg.epochs);
        let shuffle_seed = match cfg.seed {
            Some(seed) => seed.wrapping_add(epoch as u64),
            None => rand::random(),
        };
        let mut iter = BatchIter::new(train, cfg.batch_size, Some(shuffle_seed), augmenter.take());
        let steps = iter.num_batches();
        let (loss, accuracy) = train_epoch(&mut model, &mut optim, &mut iter, lr, device);
        augmenter = iter.into_augmenter();
        if !loss.is_finite() {
            tracing::warn!(epoch = epoch + 1, loss, "training loss is not finite; continuing");
        }

        let val = evaluate(&model.valid(), valid, cfg.batch_size, device)?;
        let log = EpochLog {
            epoch: epoch + 1,
            loss,
            accuracy,
            val_loss: val.loss,
            val_accuracy: val.accuracy,
            lr,
        };
        println!(
            "{steps}/{steps} - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4} - lr: {:.6}",
            log.loss, log.accuracy, log.val_loss, log.val_accuracy, log.lr
        );
        tracing::debug!(?log, "epoch finished");
        history.push(log);

        if let Some(new_lr) = plateau.on_epoch_end(val.loss, lr) {
            println!(
                "Epoch {}: ReduceLROnPlateau reducing learning rate to {new_lr}.",
                epoch + 1
            );
            lr = new_lr;
        }
        if let StopDecision::Stop { best_epoch, restore } =
            stopper.on_epoch_end(epoch, val.loss, &model)
        {
            if let Some(best) = restore {
                println!(
                    "Restoring model weights from the end of the best epoch: {}.",
                    best_epoch + 1
                );
                model = best;
                restored_epoch = Some(best_epoch);
            }
            println!("Epoch {}: early stopping", epoch + 1);
            stopped_early = true;
            break;
        }
    }

    Ok(FitOutcome {
        model,
        history,
        stopped_early,
        restored_epoch,
        final_lr: lr,
    })
}
