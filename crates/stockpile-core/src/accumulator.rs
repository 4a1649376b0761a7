//! In-memory batch of records awaiting flush

use crate::record::Record;

/// Default flush threshold (records per artifact)
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Ordered batch of records with a fixed flush threshold.
///
/// Holds at most `threshold` records when driven by the pipeline loop:
/// callers check [`should_flush`](Self::should_flush) after every append,
/// flush [`records`](Self::records) when it fires, and
/// [`clear`](Self::clear) only once that flush is settled.
#[derive(Debug)]
pub struct BatchAccumulator {
    rows: Vec<Record>,
    threshold: usize,
}

impl BatchAccumulator {
    /// Thresholds below 1 are clamped to 1.
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            rows: Vec::with_capacity(threshold),
            threshold,
        }
    }

    /// Append a record to the end of the batch
    pub fn append(&mut self, record: Record) {
        self.rows.push(record);
    }

    /// Whether the batch has reached the threshold
    pub fn should_flush(&self) -> bool {
        self.rows.len() >= self.threshold
    }

    /// Move the buffered records out, leaving the batch empty
    pub fn take(&mut self) -> Vec<Record> {
        std::mem::replace(&mut self.rows, Vec::with_capacity(self.threshold))
    }

    /// Drop the buffered records, keeping the allocation
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Buffered records, oldest first
    pub fn records(&self) -> &[Record] {
        &self.rows
    }
}

impl Default for BatchAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}
