use clap::Parser;
use training::{init_tracing, run_pipeline, TrainArgs, TrainConfig};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = TrainArgs::parse();
    let cfg = TrainConfig::load(args.config.as_deref()).with_args(&args);
    tracing::debug!(?cfg, "resolved train config");
    if let Err(err) = run_pipeline(&cfg) {
        tracing::error!(stage = %err.stage, error = ?err.source, "pipeline aborted");
        std::process::exit(1);
    }
    Ok(())
}
