//! The staged train-evaluate-export run behind the `train` binary.
//!
//! Stages run in order and print a localized banner each. Dataset, model, training and
//! export failures end the run; evaluation and checkpoint failures are reported and
//! collected in [`PipelineReport::warnings`].

use std::fmt;
use std::path::PathBuf;

use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module};
use burn::record::RecorderError;
use burn::tensor::backend::Backend;
use cifar_dataset::{DatasetError, ImageSet};
use models::{CifarCnn, CifarCnnConfig, ModelConfigError};
use tfjs_export::{
    export_model, format_thousands, layer_plan, list_bundle, param_counts, summary_table,
    total_bytes, BundleFile, BundleSummary, ExportError, ExportOptions, ParamCounts,
};

use crate::classes::CLASS_NAMES_ZH;
use crate::config::TrainConfig;
use crate::eval::{evaluate, EvalReport};
use crate::util::{fit, save_checkpoint, validate_backend_choice, EpochLog, TrainError};
use crate::TrainBackend;

type PipelineBackend = Autodiff<TrainBackend>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Environment,
    Dataset,
    Model,
    Training,
    Evaluation,
    Checkpoint,
    Export,
}

impl Stage {
    fn failure_label(&self) -> &'static str {
        match self {
            Stage::Environment => "缺少必要的後端",
            Stage::Dataset => "資料載入失敗",
            Stage::Model => "模型建立失敗",
            Stage::Training => "訓練失敗",
            Stage::Evaluation => "評估失敗",
            Stage::Checkpoint => "原生模型儲存失敗",
            Stage::Export => "轉換失敗",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Environment => "environment",
            Stage::Dataset => "dataset",
            Stage::Model => "model",
            Stage::Training => "training",
            Stage::Evaluation => "evaluation",
            Stage::Checkpoint => "checkpoint",
            Stage::Export => "export",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StageFailure {
    #[error("{0}")]
    Backend(String),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Model(#[from] ModelConfigError),
    #[error("dataset does not fit the model: {0}")]
    Mismatch(String),
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error(transparent)]
    Checkpoint(#[from] RecorderError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

#[derive(Debug, thiserror::Error)]
#[error("{}: {source}", .stage.failure_label())]
pub struct StageError {
    pub stage: Stage,
    /// Fatal errors end the run; the rest are only reported.
    pub fatal: bool,
    #[source]
    pub source: StageFailure,
}

fn fatal<E: Into<StageFailure>>(stage: Stage) -> impl FnOnce(E) -> StageError {
    move |err| {
        let err = StageError {
            stage,
            fatal: true,
            source: err.into(),
        };
        println!("✗ {err}");
        err
    }
}

fn warning(stage: Stage, source: impl Into<StageFailure>, marker: &str) -> StageError {
    let err = StageError {
        stage,
        fatal: false,
        source: source.into(),
    };
    println!("{marker} {err}");
    tracing::warn!(%stage, error = %err.source, "stage failed; continuing");
    err
}

#[derive(Debug)]
pub struct PipelineReport {
    pub train_samples: usize,
    pub test_samples: usize,
    pub params: ParamCounts,
    pub history: Vec<EpochLog>,
    pub stopped_early: bool,
    pub final_lr: f64,
    pub eval: Option<EvalReport>,
    pub checkpoint: Option<PathBuf>,
    pub bundle: BundleSummary,
    pub bundle_files: Vec<BundleFile>,
    pub warnings: Vec<StageError>,
}

impl PipelineReport {
    pub fn epochs_run(&self) -> usize {
        self.history.len()
    }
}

fn rule(ch: char) -> String {
    std::iter::repeat(ch).take(60).collect()
}

fn check_fit(set: &ImageSet, cfg: &CifarCnnConfig) -> Result<(), StageFailure> {
    if set.channels != cfg.in_channels || set.height != cfg.input_size || set.width != cfg.input_size {
        return Err(StageFailure::Mismatch(format!(
            "images are {}x{}x{}, model expects {}x{}x{}",
            set.height, set.width, set.channels, cfg.input_size, cfg.input_size, cfg.in_channels
        )));
    }
    if let Some(label) = set.labels.iter().find(|&&l| l as usize >= cfg.num_classes) {
        return Err(StageFailure::Mismatch(format!(
            "label {label} is outside the {} model classes",
            cfg.num_classes
        )));
    }
    Ok(())
}

fn print_eval(report: &EvalReport) {
    println!("✓ 測試準確率: {:.2}%", report.accuracy * 100.0);
    println!("✓ 測試損失: {:.4}", report.loss);
    println!("\n各類別準確率:");
    println!("{}", "-".repeat(40));
    for class in &report.per_class {
        println!("{}", class.line());
    }
}

fn print_next_steps(cfg: &TrainConfig) {
    println!("\n{}", rule('='));
    println!("✓✓✓ 訓練完成！✓✓✓");
    println!("{}", rule('='));
    println!("\n下一步:");
    println!("1. 建立新資料夾: cifar10-app");
    println!("2. 在裡面建立 model/ 子資料夾");
    println!(
        "3. 將 {}/ 中的所有檔案複製到 model/",
        cfg.export_dir.display()
    );
    println!("4. 以任一靜態檔案伺服器啟動 cifar10-app 測試, 例如:");
    println!("   cd cifar10-app");
    println!("   python -m http.server 8000");
    if !cfg.source.is_synthetic() {
        println!("\n預期準確率: 75-85%");
    }
    println!("{}", rule('='));
}

/// Runs every stage with `cfg`; returns the first fatal stage error.
pub fn run_pipeline(cfg: &TrainConfig) -> Result<PipelineReport, StageError> {
    println!("{}", rule('='));
    println!("CIFAR-10 圖片分類模型訓練");
    println!("{}", rule('='));
    let mut warnings = Vec::new();

    validate_backend_choice(cfg.backend)
        .map_err(|e| StageFailure::Backend(e.to_string()))
        .map_err(fatal(Stage::Environment))?;
    let device = <PipelineBackend as Backend>::Device::default();
    if let Some(seed) = cfg.seed {
        PipelineBackend::seed(seed);
    }
    println!("✓ 環境就緒 (backend: {})", cfg.backend.name());

    println!("\n1. 載入 CIFAR-10 資料集...");
    let splits = cfg.source.load(&cfg.data_dir).map_err(fatal(Stage::Dataset))?;
    println!(
        "✓ 訓練集: {} 張圖片 ({}x{} 彩色)",
        splits.train.len(),
        splits.train.height,
        splits.train.width
    );
    println!("✓ 測試集: {} 張圖片", splits.test.len());
    println!("✓ 類別數量: {} 種", CLASS_NAMES_ZH.len());

    println!("\n2. 建立 CNN 模型...");
    cfg.model.validate().map_err(fatal(Stage::Model))?;
    check_fit(&splits.train, &cfg.model)
        .and_then(|_| check_fit(&splits.test, &cfg.model))
        .map_err(fatal(Stage::Model))?;
    let model = CifarCnn::<PipelineBackend>::new(&cfg.model, &device);
    let plan = layer_plan(&cfg.model);
    let params = param_counts(&plan);
    tracing::debug!(
        burn_params = model.num_params(),
        trainable = params.trainable,
        "model built"
    );
    println!("✓ 模型架構建立完成");
    println!("✓ 總參數量: {}", format_thousands(params.total()));
    println!("{}", summary_table(&plan));

    println!("\n3. 訓練模型...");
    if !cfg.source.is_synthetic() {
        println!("(這需要 10-20 分鐘，請耐心等待)");
    }
    println!("{}", "-".repeat(60));
    tracing::debug!(augment = %cfg.augment.describe(), "augmentation");
    let outcome = fit(model, &splits.train, &splits.test, cfg, &device)
        .map_err(fatal(Stage::Training))?;
    println!("\n✓ 訓練完成！");
    let model = outcome.model.valid();

    println!("\n4. 評估模型...");
    let eval = match evaluate(&model, &splits.test, cfg.batch_size, &device) {
        Ok(report) => {
            print_eval(&report);
            Some(report)
        }
        Err(err) => {
            warnings.push(warning(Stage::Evaluation, err, "✗"));
            None
        }
    };

    println!("\n5. 儲存模型...");
    let checkpoint = match save_checkpoint(&model, &cfg.checkpoint_out) {
        Ok(path) => {
            println!("✓ 原生模型已儲存: {}", path.display());
            Some(path)
        }
        Err(err) => {
            warnings.push(warning(Stage::Checkpoint, err, "⚠"));
            None
        }
    };

    println!("\n6. 轉換為 TensorFlow.js 格式...");
    let opts = ExportOptions {
        shard_bytes: cfg.shard_bytes,
        learning_rate: cfg.learning_rate,
    };
    let bundle = export_model(&model, &cfg.model, &cfg.export_dir, &opts)
        .map_err(fatal(Stage::Export))?;
    println!(
        "✓ TensorFlow.js 模型已儲存: {}/",
        cfg.export_dir.display()
    );
    let bundle_files = list_bundle(&cfg.export_dir).map_err(fatal(Stage::Export))?;
    println!("\n生成的檔案:");
    for file in &bundle_files {
        println!("  - {} ({:.2} KB)", file.name, file.kilobytes());
    }
    println!(
        "\n總大小: {:.2} MB",
        total_bytes(&bundle_files) as f64 / 1024.0 / 1024.0
    );

    print_next_steps(cfg);
    Ok(PipelineReport {
        train_samples: splits.train.len(),
        test_samples: splits.test.len(),
        params,
        stopped_early: outcome.stopped_early,
        final_lr: outcome.final_lr,
        history: outcome.history,
        eval,
        checkpoint,
        bundle,
        bundle_files,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_errors_carry_localized_labels() {
        let err = StageError {
            stage: Stage::Model,
            fatal: true,
            source: StageFailure::Mismatch("images are 8x8x3, model expects 32x32x3".into()),
        };
        assert_eq!(
            err.to_string(),
            "模型建立失敗: dataset does not fit the model: images are 8x8x3, model expects 32x32x3"
        );
        assert_eq!(err.stage.to_string(), "model");
    }

    #[test]
    fn mismatched_images_are_rejected() {
        let set = ImageSet::new(vec![0.0; 3 * 8 * 8], vec![0], 3, 8, 8).unwrap();
        assert!(check_fit(&set, &CifarCnnConfig::default()).is_err());
        assert!(check_fit(&set, &CifarCnnConfig::tiny(8)).is_ok());
        let bad_label = ImageSet::new(vec![0.0; 3 * 8 * 8], vec![12], 3, 8, 8).unwrap();
        assert!(check_fit(&bad_label, &CifarCnnConfig::tiny(8)).is_err());
    }
}
