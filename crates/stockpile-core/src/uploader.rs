//! Flush: serialize a batch, name it, and put it in the blob store

use crate::error::PipelineError;
use crate::record::Record;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::serializer::TabularSerializer;
use crate::store::BlobStore;

/// Default file stem for artifact keys
pub const DEFAULT_FILE_STEM: &str = "stock_batch";

/// Builds artifact keys: `{prefix}/{stem}_{batch_id}_{unix_secs}.parquet`
#[derive(Debug, Clone)]
pub struct KeyTemplate {
    prefix: String,
    stem: String,
}

impl KeyTemplate {
    /// Leading/trailing slashes on `prefix` are dropped; an empty prefix
    /// puts artifacts at the bucket root.
    pub fn new(prefix: &str, stem: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
            stem: stem.to_string(),
        }
    }

    pub fn key(&self, batch_id: u64, unix_secs: i64) -> String {
        let file = format!("{}_{batch_id}_{unix_secs}.parquet", self.stem);
        if self.prefix.is_empty() {
            file
        } else {
            format!("{}/{file}", self.prefix)
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for KeyTemplate {
    fn default() -> Self {
        Self::new("", DEFAULT_FILE_STEM)
    }
}

/// Result of a flush that wrote an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushOutcome {
    pub batch_id: u64,
    pub key: String,
    pub rows: usize,
    pub bytes: usize,
}

/// Wall-clock source in unix seconds
pub type Clock = Box<dyn Fn() -> i64 + Send>;

fn system_clock() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Owns the serializer, the store and the per-run batch counter.
///
/// The counter starts at 0 each run and is bumped before every non-empty
/// flush, so the first artifact is batch 1. A batch that fails to
/// serialize still consumes its id.
pub struct BatchUploader<S, B> {
    serializer: S,
    store: B,
    keys: KeyTemplate,
    retry: RetryPolicy,
    batch_id: u64,
    clock: Clock,
}

impl<S, B> std::fmt::Debug for BatchUploader<S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchUploader")
            .field("keys", &self.keys)
            .field("retry", &self.retry)
            .field("batch_id", &self.batch_id)
            .finish_non_exhaustive()
    }
}

impl<S: TabularSerializer, B: BlobStore> BatchUploader<S, B> {
    pub fn new(serializer: S, store: B, keys: KeyTemplate, retry: RetryPolicy) -> Self {
        Self {
            serializer,
            store,
            keys,
            retry,
            batch_id: 0,
            clock: Box::new(system_clock),
        }
    }

    /// Replace the wall clock used for key timestamps
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Serialize and upload `batch`.
    ///
    /// An empty batch is a no-op and returns `Ok(None)` without touching the
    /// serializer or the store. Clearing the batch is the caller's job.
    pub fn flush(&mut self, batch: &[Record]) -> Result<Option<FlushOutcome>, PipelineError> {
        if batch.is_empty() {
            return Ok(None);
        }

        self.batch_id += 1;
        let batch_id = self.batch_id;

        let bytes =
            self.serializer
                .serialize(batch)
                .map_err(|e| PipelineError::SerializationFailure {
                    rows: batch.len(),
                    message: e.to_string(),
                })?;

        let key = self.keys.key(batch_id, (self.clock)());
        let size = bytes.len();

        let store = &self.store;
        retry_with_backoff(&key, &self.retry, || store.put(&key, bytes.clone())).map_err(
            |source| PipelineError::StoreUnavailable {
                key: key.clone(),
                source,
            },
        )?;

        log::info!(
            "Flushed batch {batch_id}: {} rows, {size} bytes → {key}",
            batch.len()
        );

        Ok(Some(FlushOutcome {
            batch_id,
            key,
            rows: batch.len(),
            bytes: size,
        }))
    }

    /// Id of the most recent flush attempt (0 before the first)
    pub fn last_batch_id(&self) -> u64 {
        self.batch_id
    }

    pub fn store(&self) -> &B {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    use bytes::Bytes;
    use serde_json::json;

    use crate::serializer::SerializeError;
    use crate::store::StoreError;

    #[derive(Default)]
    struct CountingSerializer {
        calls: Cell<usize>,
        fail: bool,
    }

    impl TabularSerializer for CountingSerializer {
        fn serialize(&self, records: &[Record]) -> Result<Bytes, SerializeError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(SerializeError::from("boom".to_string()));
            }
            Ok(Bytes::from(format!("{} rows", records.len())))
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        puts: RefCell<Vec<String>>,
        failures_left: Cell<usize>,
    }

    impl BlobStore for RecordingStore {
        fn put(&self, key: &str, _bytes: Bytes) -> Result<(), StoreError> {
            if self.failures_left.get() > 0 {
                self.failures_left.set(self.failures_left.get() - 1);
                return Err(StoreError::new("503 slow down", true));
            }
            self.puts.borrow_mut().push(key.to_string());
            Ok(())
        }
    }

    fn rec(i: usize) -> Record {
        let mut r = Record::new();
        r.insert("seq".to_string(), json!(i));
        r
    }

    fn uploader(
        serializer: CountingSerializer,
        store: RecordingStore,
    ) -> BatchUploader<CountingSerializer, RecordingStore> {
        BatchUploader::new(
            serializer,
            store,
            KeyTemplate::new("/raw/stocks/", DEFAULT_FILE_STEM),
            RetryPolicy::immediate(2),
        )
        .with_clock(|| 1_700_000_000)
    }

    #[test]
    fn key_with_prefix() {
        let keys = KeyTemplate::new("raw/stocks/", "stock_batch");
        assert_eq!(keys.key(7, 1_700_000_000), "raw/stocks/stock_batch_7_1700000000.parquet");
    }

    #[test]
    fn key_without_prefix() {
        assert_eq!(KeyTemplate::default().key(1, 5), "stock_batch_1_5.parquet");
    }

    #[test]
    fn empty_flush_touches_nothing() {
        let mut up = uploader(CountingSerializer::default(), RecordingStore::default());
        assert_eq!(up.flush(&[]).unwrap(), None);
        assert_eq!(up.serializer.calls.get(), 0);
        assert!(up.store().puts.borrow().is_empty());
        assert_eq!(up.last_batch_id(), 0);
    }

    #[test]
    fn flush_names_and_uploads() {
        let mut up = uploader(CountingSerializer::default(), RecordingStore::default());
        let outcome = up.flush(&[rec(0), rec(1)]).unwrap().unwrap();
        assert_eq!(outcome.batch_id, 1);
        assert_eq!(outcome.rows, 2);
        assert_eq!(outcome.bytes, "2 rows".len());
        assert_eq!(outcome.key, "raw/stocks/stock_batch_1_1700000000.parquet");
        assert_eq!(*up.store().puts.borrow(), vec![outcome.key.clone()]);
    }

    #[test]
    fn keys_unique_within_same_second() {
        let mut up = uploader(CountingSerializer::default(), RecordingStore::default());
        let a = up.flush(&[rec(0)]).unwrap().unwrap();
        let b = up.flush(&[rec(1)]).unwrap().unwrap();
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn transient_store_failures_are_retried() {
        let store = RecordingStore::default();
        store.failures_left.set(2);
        let mut up = uploader(CountingSerializer::default(), store);
        assert!(up.flush(&[rec(0)]).unwrap().is_some());
        assert_eq!(up.store().puts.borrow().len(), 1);
    }

    #[test]
    fn exhausted_retries_surface_store_unavailable() {
        let store = RecordingStore::default();
        store.failures_left.set(3);
        let mut up = uploader(CountingSerializer::default(), store);
        let err = up.flush(&[rec(0)]).unwrap_err();
        assert!(matches!(err, PipelineError::StoreUnavailable { .. }));
        assert!(up.store().puts.borrow().is_empty());
    }

    #[test]
    fn serialization_failure_skips_store() {
        let serializer = CountingSerializer {
            fail: true,
            ..Default::default()
        };
        let mut up = uploader(serializer, RecordingStore::default());
        let err = up.flush(&[rec(0), rec(1), rec(2)]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SerializationFailure { rows: 3, .. }
        ));
        assert!(up.store().puts.borrow().is_empty());
        assert_eq!(up.last_batch_id(), 1);
    }
}
