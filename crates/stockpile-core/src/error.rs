//! Error taxonomy for the consume → serialize → upload pipeline

use crate::store::StoreError;

/// Error surfaced by the pipeline loop or a single flush.
///
/// `SerializationFailure` is recoverable: the pipeline reports the batch and
/// keeps consuming. The other two variants end the run.
#[derive(Debug)]
pub enum PipelineError {
    /// Record source lost its connection or its input failed mid-stream
    SourceUnavailable { message: String },
    /// Records in a batch could not be encoded (type conflict, nested value, ...)
    SerializationFailure { rows: usize, message: String },
    /// Upload failed after exhausting retries
    StoreUnavailable { key: String, source: StoreError },
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceUnavailable { message } => write!(f, "source unavailable: {message}"),
            Self::SerializationFailure { rows, message } => {
                write!(f, "failed to serialize batch of {rows} rows: {message}")
            }
            Self::StoreUnavailable { key, source } => {
                write!(f, "failed to upload {key}: {source}")
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::StoreUnavailable { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl PipelineError {
    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            message: message.into(),
        }
    }

    /// Whether the pipeline may skip the offending batch and continue.
    pub fn is_batch_local(&self) -> bool {
        matches!(self, Self::SerializationFailure { .. })
    }
}
