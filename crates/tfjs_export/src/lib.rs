//! TF.js layers-model export for `CifarCnn`.
//!
//! The bundle is a `model.json` (Keras topology plus weights manifest) and one or more
//! binary shards holding the little-endian float32 weights in manifest order.

pub mod bundle;
pub mod layout;
pub mod manifest;
pub mod topology;
pub mod weights;

use burn::tensor::backend::Backend;
use models::{CifarCnn, CifarCnnConfig, ModelConfigError};
use std::path::{Path, PathBuf};

pub use bundle::{list_bundle, read_model_json, total_bytes, BundleFile, DEFAULT_SHARD_BYTES, MODEL_JSON};
pub use manifest::{ModelJson, WeightEntry, WeightGroup};
pub use topology::{format_thousands, layer_plan, param_counts, summary_table, KerasLayer, LayerKind, ParamCounts};
pub use weights::{collect_weights, NamedWeight};

pub type ExportResult<T> = Result<T, ExportError>;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("tensor readback failed: {0}")]
    Tensor(String),
    #[error("weight layout mismatch: {0}")]
    Layout(String),
    #[error(transparent)]
    Config(#[from] ModelConfigError),
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub shard_bytes: usize,
    /// Recorded in the topology's `training_config`.
    pub learning_rate: f64,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            shard_bytes: DEFAULT_SHARD_BYTES,
            learning_rate: 1e-3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BundleSummary {
    pub dir: PathBuf,
    pub model_json: PathBuf,
    pub shards: Vec<PathBuf>,
    pub weight_count: usize,
    pub params: ParamCounts,
}

/// Write `model` as a TF.js layers-model bundle into `dir`.
pub fn export_model<B: Backend>(
    model: &CifarCnn<B>,
    cfg: &CifarCnnConfig,
    dir: &Path,
    opts: &ExportOptions,
) -> ExportResult<BundleSummary> {
    cfg.validate()?;
    let plan = layer_plan(cfg);
    let named = collect_weights(model, cfg)?;
    let bytes = weights::to_le_bytes(&named);

    let entries = named
        .iter()
        .map(|w| WeightEntry {
            name: w.name.clone(),
            shape: w.shape.clone(),
            dtype: "float32".to_string(),
        })
        .collect();
    let doc = ModelJson::new(
        topology::model_topology(&plan, opts.learning_rate),
        vec![WeightGroup {
            paths: bundle::shard_names(bytes.len(), opts.shard_bytes),
            weights: entries,
        }],
    );

    let mut written = bundle::write_bundle(dir, &doc, &bytes, opts.shard_bytes)?;
    let model_json = written.remove(0);
    tracing::info!(
        dir = %dir.display(),
        shards = written.len(),
        bytes = bytes.len(),
        "wrote tfjs bundle"
    );
    Ok(BundleSummary {
        dir: dir.to_path_buf(),
        model_json,
        shards: written,
        weight_count: named.len(),
        params: param_counts(&plan),
    })
}
