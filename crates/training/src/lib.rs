#![recursion_limit = "256"]

pub mod callbacks;
pub mod classes;
pub mod config;
pub mod eval;
pub mod pipeline;
pub mod util;

pub use callbacks::{EarlyStopping, EarlyStoppingConfig, PlateauConfig, ReduceLrOnPlateau};
pub use config::{DatasetSource, TrainConfig};
pub use eval::{evaluate, ClassAccuracy, EvalReport};
pub use models::{CifarCnn, CifarCnnConfig};
pub use pipeline::{run_pipeline, PipelineReport, Stage, StageError};
pub use util::{fit, BackendKind, EpochLog, TrainArgs, TrainError};
/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

/// Installs the fmt subscriber on stderr; `RUST_LOG` overrides the `warn` default.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
