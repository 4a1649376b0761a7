pub mod inspect;
pub mod replay;
pub mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use stockpile_core::{
    fmt_bytes, fmt_num, run_pipeline, BatchAccumulator, BatchUploader, ConflictPolicy,
    KeyTemplate, ObjectBlobStore, ParquetSerializer, PipelineOptions, ProgressContext,
    RecordSource, Summary,
};

use crate::config::Config;

/// Batching options shared by `run` and `replay`
#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Records per Parquet file
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Leave a trailing partial batch unflushed at end of stream
    #[arg(long)]
    pub no_drain: bool,

    /// Write artifacts under this local directory instead of S3
    #[arg(long, value_name = "DIR")]
    pub dry_run: Option<PathBuf>,

    /// Type conflict policy for schema inference (reject, widen, coerce)
    #[arg(long)]
    pub conflict_policy: Option<ConflictPolicy>,

    /// Key prefix inside the bucket
    #[arg(long)]
    pub prefix: Option<String>,
}

fn open_store(args: &BatchArgs, config: &Config) -> Result<ObjectBlobStore> {
    if let Some(dir) = &args.dry_run {
        return ObjectBlobStore::local(dir)
            .with_context(|| format!("Failed to open local store at {}", dir.display()));
    }
    if config.aws.bucket.is_empty() {
        anyhow::bail!("aws.bucket is not configured (set it in stockpile.toml or use --dry-run)");
    }
    ObjectBlobStore::s3(&config.s3_settings()).context("Failed to create S3 client")
}

/// Build the accumulator/uploader pair and run the loop over `source`
pub fn execute(
    source: &mut dyn RecordSource,
    args: &BatchArgs,
    config: &Config,
    progress: &ProgressContext,
) -> Result<Summary> {
    let store = open_store(args, config)?;
    let policy = args
        .conflict_policy
        .unwrap_or(config.batch.conflict_policy);
    let serializer = ParquetSerializer::new(policy, config.output.compression_level)
        .context("Invalid output.compression_level")?;
    let prefix = args.prefix.as_deref().unwrap_or(&config.aws.prefix);
    let keys = KeyTemplate::new(prefix, &config.batch.file_stem);

    let batch_size = args.batch_size.unwrap_or(config.batch.size);
    let options = PipelineOptions {
        drain_on_close: config.batch.drain_on_close && !args.no_drain,
    };

    log::info!("Uploading to {}/{}", store.label(), keys.prefix());
    log::info!(
        "  Batch size: {batch_size}, policy: {policy}, drain on close: {}",
        options.drain_on_close
    );

    let mut acc = BatchAccumulator::new(batch_size);
    let mut uploader = BatchUploader::new(serializer, store, keys, config.retry_policy());

    let pb = progress.consumer_line(&source.describe());
    let result = run_pipeline(source, &mut acc, &mut uploader, &options, &pb);
    pb.finish_and_clear();

    match result {
        Ok(summary) => {
            print_summary(&summary);
            Ok(summary)
        }
        Err(abort) => {
            print_summary(&abort.summary);
            Err(abort.error.into())
        }
    }
}

/// Print a key-value summary table on stderr
fn print_table(title: &str, rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    eprintln!("\n{table}");
}

fn print_summary(summary: &Summary) {
    let secs = summary.elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        summary.records_consumed as f64 / secs
    } else {
        0.0
    };
    print_table(
        "Run",
        &[
            (
                "Records",
                format!(
                    "{} consumed ({} undecodable)",
                    fmt_num(summary.records_consumed),
                    fmt_num(summary.skipped_messages as u64)
                ),
            ),
            (
                "Files",
                format!(
                    "{} uploaded ({} rows, {})",
                    fmt_num(summary.flushes),
                    fmt_num(summary.rows_uploaded),
                    fmt_bytes(summary.bytes_uploaded)
                ),
            ),
            (
                "Skipped batches",
                format!(
                    "{} ({} rows)",
                    fmt_num(summary.skipped_batches),
                    fmt_num(summary.skipped_rows)
                ),
            ),
            ("Unflushed", fmt_num(summary.unflushed as u64)),
            ("Time", format!("{secs:.1}s ({rate:.0} records/sec)")),
        ],
    );
}

pub fn print_config(config: &Config) {
    let masked = |v: &Option<String>| {
        if v.is_some() {
            "configured".to_string()
        } else {
            "not set".to_string()
        }
    };
    let k = &config.kafka;
    let a = &config.aws;
    let b = &config.batch;
    print_table(
        "Setting",
        &[
            ("Kafka servers", k.bootstrap_servers.clone()),
            ("Kafka topic", k.topic.clone()),
            ("Kafka group", k.group_id.clone()),
            (
                "Idle timeout",
                if k.idle_timeout_secs == 0 {
                    "never".to_string()
                } else {
                    format!("{}s", k.idle_timeout_secs)
                },
            ),
            ("S3 bucket", a.bucket.clone()),
            ("S3 prefix", a.prefix.clone()),
            ("S3 region", a.region.clone()),
            ("S3 endpoint", a.endpoint.clone().unwrap_or_default()),
            ("Access key id", masked(&a.access_key_id)),
            ("Secret access key", masked(&a.secret_access_key)),
            ("Batch size", b.size.to_string()),
            ("Drain on close", b.drain_on_close.to_string()),
            ("File stem", b.file_stem.clone()),
            ("Conflict policy", b.conflict_policy.to_string()),
            ("Compression level", config.output.compression_level.to_string()),
            (
                "Retries",
                format!(
                    "{} (base {}ms)",
                    config.retry.max_retries, config.retry.base_delay_ms
                ),
            ),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockpile_core::VecSource;
    use tempfile::TempDir;

    fn batch_args(dir: &TempDir) -> BatchArgs {
        BatchArgs {
            batch_size: Some(2),
            no_drain: false,
            dry_run: Some(dir.path().to_path_buf()),
            conflict_policy: None,
            prefix: Some("quotes".to_string()),
        }
    }

    #[test]
    fn missing_bucket_without_dry_run_fails() {
        let args = BatchArgs {
            batch_size: None,
            no_drain: false,
            dry_run: None,
            conflict_policy: None,
            prefix: None,
        };
        let err = open_store(&args, &Config::default()).unwrap_err();
        assert!(format!("{err}").contains("aws.bucket"));
    }

    #[test]
    fn execute_writes_to_dry_run_dir() {
        let dir = TempDir::new().unwrap();
        let records = (0..5)
            .map(|i| {
                serde_json::json!({"symbol": "AAPL", "seq": i})
                    .as_object()
                    .unwrap()
                    .clone()
            })
            .collect();
        let mut source = VecSource::new(records);
        let summary = execute(
            &mut source,
            &batch_args(&dir),
            &Config::default(),
            &ProgressContext::hidden(),
        )
        .unwrap();

        assert_eq!(summary.flushes, 3);
        assert!(summary
            .artifacts
            .iter()
            .all(|k| k.starts_with("quotes/stock_batch_")));
        assert_eq!(std::fs::read_dir(dir.path().join("quotes")).unwrap().count(), 3);
    }

    #[test]
    fn no_drain_leaves_partial_batch() {
        let dir = TempDir::new().unwrap();
        let mut args = batch_args(&dir);
        args.no_drain = true;
        let records = (0..5)
            .map(|i| serde_json::json!({"seq": i}).as_object().unwrap().clone())
            .collect();
        let summary = execute(
            &mut VecSource::new(records),
            &args,
            &Config::default(),
            &ProgressContext::hidden(),
        )
        .unwrap();
        assert_eq!(summary.flushes, 2);
        assert_eq!(summary.unflushed, 1);
    }
}
