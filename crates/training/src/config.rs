use std::path::{Path, PathBuf};

use cifar_dataset::{synthetic_splits, AugmentConfig, Cifar10, DatasetResult, Splits, SyntheticConfig};
use models::CifarCnnConfig;
use serde::Deserialize;

use crate::callbacks::{EarlyStoppingConfig, PlateauConfig};
use crate::util::{BackendKind, TrainArgs};

pub const DEFAULT_CONFIG_NAME: &str = "cifar10-train.toml";
pub const CONFIG_ENV: &str = "CIFAR10_TRAIN_CONFIG";

#[derive(Debug, Clone, PartialEq)]
pub enum DatasetSource {
    Cifar10,
    Synthetic(SyntheticConfig),
}

impl DatasetSource {
    pub fn load(&self, data_dir: &Path) -> DatasetResult<Splits> {
        match self {
            DatasetSource::Cifar10 => Cifar10::new(data_dir).load(),
            DatasetSource::Synthetic(cfg) => synthetic_splits(cfg),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, DatasetSource::Synthetic(_))
    }
}

/// Everything one pipeline run needs; defaults reproduce the reference CIFAR-10 run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub backend: BackendKind,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub data_dir: PathBuf,
    pub checkpoint_out: PathBuf,
    pub export_dir: PathBuf,
    pub seed: Option<u64>,
    pub source: DatasetSource,
    pub model: CifarCnnConfig,
    pub augment: AugmentConfig,
    pub plateau: PlateauConfig,
    pub early_stopping: EarlyStoppingConfig,
    pub shard_bytes: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::NdArray,
            epochs: 30,
            batch_size: 128,
            learning_rate: 1e-3,
            data_dir: PathBuf::from("data"),
            checkpoint_out: PathBuf::from("cifar10_model.bin"),
            export_dir: PathBuf::from("cifar10_tfjs_model"),
            seed: None,
            source: DatasetSource::Cifar10,
            model: CifarCnnConfig::default(),
            augment: AugmentConfig::default(),
            plateau: PlateauConfig::default(),
            early_stopping: EarlyStoppingConfig::default(),
            shard_bytes: tfjs_export::DEFAULT_SHARD_BYTES,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct TrainConfigFile {
    backend: Option<BackendKind>,
    epochs: Option<usize>,
    batch_size: Option<usize>,
    learning_rate: Option<f64>,
    data_dir: Option<String>,
    checkpoint_out: Option<String>,
    export_dir: Option<String>,
    seed: Option<u64>,
    synthetic: Option<bool>,
    shard_bytes: Option<usize>,
    augment: Option<AugmentSection>,
    plateau: Option<PlateauConfig>,
    early_stopping: Option<EarlyStoppingConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct AugmentSection {
    width_shift: Option<f32>,
    height_shift: Option<f32>,
    horizontal_flip: Option<bool>,
    enabled: Option<bool>,
}

impl TrainConfig {
    /// Small run on generated data: tiny model sized to the stand-in images.
    pub fn synthetic() -> Self {
        let data = SyntheticConfig::default();
        Self {
            epochs: 2,
            batch_size: 16,
            model: CifarCnnConfig::tiny(data.size),
            source: DatasetSource::Synthetic(data),
            ..Self::default()
        }
    }

    /// `--config`, else `$CIFAR10_TRAIN_CONFIG`, else `./cifar10-train.toml`, else defaults.
    pub fn load(explicit: Option<&Path>) -> Self {
        let (path, requested) = config_path(explicit);
        if requested && !path.exists() {
            tracing::warn!(path = %path.display(), "train config not found; using defaults");
        }
        let cfg = Self::from_path(&path).unwrap_or_default();
        cfg.warn_if_invalid();
        cfg
    }

    /// `None` when the file is absent or unreadable; the latter is logged.
    pub fn from_path(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "cannot read train config; using defaults");
                return None;
            }
        };
        match toml::from_str::<TrainConfigFile>(&raw) {
            Ok(file) => Some(Self::from_file(file)),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "invalid train config; using defaults");
                None
            }
        }
    }

    fn from_file(file: TrainConfigFile) -> Self {
        let base = if file.synthetic == Some(true) {
            Self::synthetic()
        } else {
            Self::default()
        };
        let augment = match file.augment {
            Some(AugmentSection {
                enabled: Some(false),
                ..
            }) => AugmentConfig::disabled(),
            Some(section) => AugmentConfig {
                width_shift: section.width_shift.unwrap_or(base.augment.width_shift),
                height_shift: section.height_shift.unwrap_or(base.augment.height_shift),
                horizontal_flip: section
                    .horizontal_flip
                    .unwrap_or(base.augment.horizontal_flip),
                seed: None,
            },
            None => base.augment.clone(),
        };
        TrainConfig {
            backend: file.backend.unwrap_or(base.backend),
            epochs: file.epochs.unwrap_or(base.epochs),
            batch_size: file.batch_size.unwrap_or(base.batch_size),
            learning_rate: file.learning_rate.unwrap_or(base.learning_rate),
            data_dir: file.data_dir.map(PathBuf::from).unwrap_or(base.data_dir),
            checkpoint_out: file
                .checkpoint_out
                .map(PathBuf::from)
                .unwrap_or(base.checkpoint_out),
            export_dir: file.export_dir.map(PathBuf::from).unwrap_or(base.export_dir),
            seed: file.seed.or(base.seed),
            shard_bytes: file.shard_bytes.unwrap_or(base.shard_bytes),
            augment,
            plateau: file.plateau.unwrap_or(base.plateau),
            early_stopping: file.early_stopping.unwrap_or(base.early_stopping),
            source: base.source,
            model: base.model,
        }
    }

    /// CLI flags win over the file and the defaults.
    pub fn with_args(mut self, args: &TrainArgs) -> Self {
        if args.synthetic && !self.source.is_synthetic() {
            let synthetic = Self::synthetic();
            self.source = synthetic.source;
            self.model = synthetic.model;
        }
        if let Some(backend) = args.backend {
            self.backend = backend;
        }
        if let Some(epochs) = args.epochs {
            self.epochs = epochs;
        }
        if let Some(batch_size) = args.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(lr) = args.lr {
            self.learning_rate = lr;
        }
        if let Some(dir) = &args.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(path) = &args.checkpoint_out {
            self.checkpoint_out = path.clone();
        }
        if let Some(dir) = &args.export_dir {
            self.export_dir = dir.clone();
        }
        if args.seed.is_some() {
            self.seed = args.seed;
        }
        self
    }

    fn warn_if_invalid(&self) {
        if self.epochs == 0 {
            tracing::warn!("train config: epochs is 0; the model will be exported untrained");
        }
        if self.batch_size == 0 {
            tracing::warn!("train config: batch_size is 0; batches of 1 will be used");
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            tracing::warn!(lr = self.learning_rate, "train config: learning_rate is not positive");
        }
    }
}

/// The config file to read, and whether it was asked for (flag or env) rather than implied.
fn config_path(explicit: Option<&Path>) -> (PathBuf, bool) {
    if let Some(path) = explicit {
        return (path.to_path_buf(), true);
    }
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => (PathBuf::from(path), true),
        None => (PathBuf::from(DEFAULT_CONFIG_NAME), false),
    }
}
