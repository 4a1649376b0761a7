//! stockpile - archive a Kafka topic to Parquet files on S3
//!
//! Consumes JSON messages, batches them, and uploads each batch as a
//! Parquet object.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "stockpile")]
#[command(about = "Batch a Kafka topic into Parquet files on S3")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./stockpile.toml or ~/.config/stockpile/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Consume the Kafka topic and upload batches
    Run(cmd::run::RunArgs),
    /// Feed a newline-delimited JSON file (optionally .gz) through the pipeline
    Replay(cmd::replay::ReplayArgs),
    /// Print the schema and leading rows of a Parquet artifact
    Inspect(cmd::inspect::InspectArgs),
    /// Show current configuration
    Config,
}

fn setup_signal_handler() {
    // First signal: stop consuming, drain, exit cleanly
    // Second signal: exit immediately
    // SAFETY: an atomic swap and process::exit are async-signal-safe
    unsafe {
        for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
            signal_hook::low_level::register(signal, || {
                if stockpile_core::request_shutdown() {
                    std::process::exit(130);
                }
            })
            .expect("Failed to register signal handler");
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let progress = stockpile_core::ProgressContext::new();
    let multi = progress.is_tty().then(|| progress.multi());
    stockpile_core::init_logging(cli.debug, multi);

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    let result = match cli.command {
        Command::Run(args) => {
            setup_signal_handler();
            cmd::run::run(args, &config, &progress)
        }
        Command::Replay(args) => {
            setup_signal_handler();
            cmd::replay::run(args, &config, &progress)
        }
        Command::Inspect(args) => cmd::inspect::run(args),
        Command::Config => {
            cmd::print_config(&config);
            Ok(())
        }
    };

    if let Err(e) = &result {
        log::error!("Fatal error: {e:#}");
    }
    result
}
