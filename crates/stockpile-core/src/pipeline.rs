//! The consume loop: pull → append → flush when full → drain on close

use std::time::{Duration, Instant};

use indicatif::ProgressBar;

use crate::accumulator::BatchAccumulator;
use crate::error::PipelineError;
use crate::progress::fmt_num;
use crate::serializer::TabularSerializer;
use crate::shutdown::is_shutdown_requested;
use crate::source::RecordSource;
use crate::store::BlobStore;
use crate::uploader::{BatchUploader, FlushOutcome};

/// Spinner refresh interval (every N records to avoid overhead)
const UPDATE_INTERVAL: u64 = 100;

/// Loop behaviour knobs
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Flush the partial batch left when the loop ends
    pub drain_on_close: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            drain_on_close: true,
        }
    }
}

/// Counters for one run of the loop
#[derive(Debug, Default)]
pub struct Summary {
    pub records_consumed: u64,
    pub flushes: u64,
    pub rows_uploaded: u64,
    pub bytes_uploaded: u64,
    pub skipped_batches: u64,
    pub skipped_rows: u64,
    /// Messages the source could not decode
    pub skipped_messages: usize,
    /// Records still buffered when the loop returned
    pub unflushed: usize,
    /// Keys written, in flush order
    pub artifacts: Vec<String>,
    pub elapsed: Duration,
}

impl Summary {
    fn record_flush(&mut self, outcome: FlushOutcome) {
        self.flushes += 1;
        self.rows_uploaded += outcome.rows as u64;
        self.bytes_uploaded += outcome.bytes as u64;
        self.artifacts.push(outcome.key);
    }
}

/// Flush the buffered batch, clearing it only once the flush is settled.
///
/// Serialization failures skip the batch. Any other error is returned and
/// the records stay buffered.
fn flush_batch<S: TabularSerializer, B: BlobStore>(
    acc: &mut BatchAccumulator,
    uploader: &mut BatchUploader<S, B>,
    summary: &mut Summary,
) -> Result<(), PipelineError> {
    match uploader.flush(acc.records()) {
        Ok(Some(outcome)) => summary.record_flush(outcome),
        Ok(None) => {}
        Err(e) if e.is_batch_local() => {
            log::error!("{e}; skipping batch {}", uploader.last_batch_id());
            summary.skipped_batches += 1;
            summary.skipped_rows += acc.len() as u64;
        }
        Err(e) => return Err(e),
    }
    acc.clear();
    Ok(())
}

fn update_progress(pb: &ProgressBar, summary: &Summary, buffered: usize) {
    pb.set_message(format!(
        "{} records, {} files, {} buffered",
        fmt_num(summary.records_consumed),
        fmt_num(summary.flushes),
        fmt_num(buffered as u64)
    ));
}

/// A run that ended on a fatal error, with the counters gathered up to it
#[derive(Debug)]
pub struct PipelineAbort {
    pub error: PipelineError,
    pub summary: Summary,
}

impl std::fmt::Display for PipelineAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (after {} files, {} records unflushed)",
            self.error, self.summary.flushes, self.summary.unflushed
        )
    }
}

impl std::error::Error for PipelineAbort {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Run the single-consumer loop until the source ends or shutdown is requested.
///
/// With `drain_on_close`, the partial batch is flushed on the way out, also
/// after a source failure. A store failure ends the run immediately and
/// leaves the failed batch in `acc`.
pub fn run_pipeline<R, S, B>(
    source: &mut R,
    acc: &mut BatchAccumulator,
    uploader: &mut BatchUploader<S, B>,
    options: &PipelineOptions,
    pb: &ProgressBar,
) -> Result<Summary, PipelineAbort>
where
    R: RecordSource + ?Sized,
    S: TabularSerializer,
    B: BlobStore,
{
    let start = Instant::now();
    let mut summary = Summary::default();

    log::info!(
        "Consuming from {} (batch size {})",
        source.describe(),
        acc.threshold()
    );

    let result = consume(source, acc, uploader, options, pb, &mut summary);

    update_progress(pb, &summary, acc.len());
    summary.unflushed = acc.len();
    summary.skipped_messages = source.skipped_messages();
    summary.elapsed = start.elapsed();

    match result {
        Ok(()) => Ok(summary),
        Err(error) => Err(PipelineAbort { error, summary }),
    }
}

fn consume<R, S, B>(
    source: &mut R,
    acc: &mut BatchAccumulator,
    uploader: &mut BatchUploader<S, B>,
    options: &PipelineOptions,
    pb: &ProgressBar,
    summary: &mut Summary,
) -> Result<(), PipelineError>
where
    R: RecordSource + ?Sized,
    S: TabularSerializer,
    B: BlobStore,
{
    let mut source_error = None;

    loop {
        if is_shutdown_requested() {
            log::info!("Shutdown requested, stopping consumer");
            break;
        }
        let record = match source.next_record() {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(e) => {
                source_error = Some(e);
                break;
            }
        };

        summary.records_consumed += 1;
        acc.append(record);

        if acc.should_flush() {
            flush_batch(acc, uploader, summary)?;
        }

        if summary.records_consumed % UPDATE_INTERVAL == 0 {
            update_progress(pb, summary, acc.len());
        }
    }

    if options.drain_on_close && !acc.is_empty() {
        log::info!("Draining {} buffered records", acc.len());
        match (flush_batch(acc, uploader, summary), &source_error) {
            (Ok(()), _) => {}
            (Err(e), None) => return Err(e),
            // Source error wins; the drain failure is only reported
            (Err(e), Some(_)) => log::error!("Drain after source failure failed: {e}"),
        }
    } else if !acc.is_empty() {
        log::warn!(
            "{} records left unflushed (drain on close disabled)",
            acc.len()
        );
    }

    match source_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
