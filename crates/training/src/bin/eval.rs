use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use training::util::{load_checkpoint, validate_backend_choice};
use training::{evaluate, init_tracing, BackendKind, TrainArgs, TrainBackend, TrainConfig};

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a saved CIFAR-10 checkpoint on the test split (overall and per-class accuracy)"
)]
struct Args {
    /// Checkpoint written by `train`. Default: the configured checkpoint_out.
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,
    /// Directory holding cifar-10-batches-bin.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Batch size for inference.
    #[arg(long)]
    batch_size: Option<usize>,
    /// Evaluate a tiny checkpoint against the generated stand-in set.
    #[arg(long)]
    synthetic: bool,
    /// Config file shared with `train`.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let overrides = TrainArgs {
        backend: args.backend,
        data_dir: args.data_dir,
        batch_size: args.batch_size,
        synthetic: args.synthetic,
        ..TrainArgs::default()
    };
    let cfg = TrainConfig::load(args.config.as_deref()).with_args(&overrides);
    validate_backend_choice(cfg.backend)?;

    let device = <TrainBackend as burn::tensor::backend::Backend>::Device::default();
    let checkpoint = args.checkpoint.unwrap_or_else(|| cfg.checkpoint_out.clone());
    let model = load_checkpoint::<TrainBackend>(&cfg.model, &checkpoint, &device)
        .map_err(|e| anyhow::anyhow!("failed to load checkpoint {}: {e}", checkpoint.display()))?;
    let splits = cfg
        .source
        .load(&cfg.data_dir)
        .with_context(|| format!("load dataset under {}", cfg.data_dir.display()))?;

    let report = evaluate(&model, &splits.test, cfg.batch_size, &device)?;
    println!(
        "checkpoint {}: accuracy {:.2}% loss {:.4} over {} images",
        checkpoint.display(),
        report.accuracy * 100.0,
        report.loss,
        report.samples
    );
    for class in &report.per_class {
        println!("{}", class.line());
    }
    Ok(())
}
