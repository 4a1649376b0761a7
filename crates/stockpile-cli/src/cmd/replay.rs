//! Replay subcommand - push a recorded NDJSON file through the pipeline

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use stockpile_core::{FileSource, ProgressContext};

use super::BatchArgs;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Newline-delimited JSON file; `.gz` files are decompressed
    pub file: PathBuf,

    #[command(flatten)]
    pub batch: BatchArgs,
}

pub fn run(args: ReplayArgs, config: &Config, progress: &ProgressContext) -> Result<()> {
    let mut source = FileSource::open(&args.file)
        .with_context(|| format!("Failed to open {}", args.file.display()))?;

    let summary = super::execute(&mut source, &args.batch, config, progress)?;
    if summary.skipped_batches > 0 {
        anyhow::bail!("{} batches failed to serialize", summary.skipped_batches);
    }
    Ok(())
}
