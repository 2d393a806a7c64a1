use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use model_patch::{patch_file, DEFAULT_MODEL_JSON};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "patch_model",
    about = "Rename InputLayer batch_shape and strip sequential/ weight prefixes in a TF.js model.json"
)]
struct Args {
    /// model.json to patch in place.
    #[arg(default_value = DEFAULT_MODEL_JSON)]
    path: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let (report, check) = patch_file(&args.path)?;
    tracing::debug!(?report, "patch report");

    for line in check.lines() {
        println!("{line}");
    }
    Ok(())
}
