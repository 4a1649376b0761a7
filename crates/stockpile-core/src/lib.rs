//! Stockpile Core - batch streamed records into Parquet files on object storage
//!
//! Records are pulled one at a time from a [`RecordSource`], buffered in a
//! [`BatchAccumulator`], and flushed through a [`TabularSerializer`] into a
//! [`BlobStore`] whenever the batch reaches its size threshold.

pub mod accumulator;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod retry;
pub mod schema;
pub mod serializer;
pub mod shutdown;
pub mod source;
pub mod store;
pub mod uploader;

// Re-exports for convenience
pub use arrow::datatypes::SchemaRef;
pub use accumulator::{BatchAccumulator, DEFAULT_BATCH_SIZE};
pub use error::PipelineError;
pub use logging::init_logging;
pub use pipeline::{run_pipeline, PipelineAbort, PipelineOptions, Summary};
pub use progress::{fmt_bytes, fmt_num, ProgressContext};
pub use record::{decode_record, DecodeError, Record};
pub use retry::RetryPolicy;
pub use schema::ConflictPolicy;
pub use serializer::{
    decode_parquet, ParquetSerializer, TabularSerializer, DEFAULT_ZSTD_LEVEL, EMPTY_RECORD_COLUMN,
};
pub use shutdown::{is_shutdown_requested, request_shutdown, shutdown_flag};
pub use source::{FileSource, RecordSource, VecSource};
pub use store::{BlobStore, ObjectBlobStore, S3Settings, StoreError};
pub use uploader::{BatchUploader, FlushOutcome, KeyTemplate, DEFAULT_FILE_STEM};
