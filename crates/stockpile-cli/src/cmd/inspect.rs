//! Inspect subcommand - dump a Parquet artifact as JSON lines

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use stockpile_core::{decode_parquet, fmt_num, Record, SchemaRef};

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Local Parquet file (e.g. from a --dry-run directory)
    pub file: PathBuf,

    /// Number of rows to print
    #[arg(short = 'n', long, default_value_t = 10)]
    pub limit: usize,
}

pub fn run(args: InspectArgs) -> Result<()> {
    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let (schema, records) = decode_parquet(bytes.into())
        .with_context(|| format!("Failed to decode {}", args.file.display()))?;

    let mut out = std::io::stdout().lock();
    write_report(&mut out, &schema, &records, args.limit)?;
    Ok(())
}

fn write_report(
    out: &mut impl Write,
    schema: &SchemaRef,
    records: &[Record],
    limit: usize,
) -> Result<()> {
    writeln!(out, "# {} rows", fmt_num(records.len() as u64))?;
    for field in schema.fields() {
        writeln!(out, "# {}: {}", field.name(), field.data_type())?;
    }
    for record in records.iter().take(limit) {
        serde_json::to_writer(&mut *out, record)?;
        writeln!(out)?;
    }
    Ok(())
}
