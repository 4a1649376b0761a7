//! Blob store: durable `put(key, bytes)` over any `object_store` backend.
//!
//! `object_store` is async; the pipeline is a single synchronous pull loop,
//! so every call is bridged through a shared tokio runtime with `block_on`.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};

/// Shared tokio runtime for object store calls.
static STORE_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Failed store operation, classified for the retry loop
#[derive(Debug)]
pub struct StoreError {
    message: String,
    retryable: bool,
}

impl StoreError {
    pub fn new(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            message: message.into(),
            retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<object_store::Error> for StoreError {
    fn from(e: object_store::Error) -> Self {
        use object_store::Error as E;
        // Caller mistakes and missing objects won't fix themselves on retry
        let retryable = !matches!(
            e,
            E::NotFound { .. }
                | E::InvalidPath { .. }
                | E::NotSupported { .. }
                | E::AlreadyExists { .. }
                | E::Precondition { .. }
                | E::NotImplemented
                | E::UnknownConfigurationKey { .. }
        );
        Self::new(e.to_string(), retryable)
    }
}

/// Durable storage for serialized batches.
pub trait BlobStore {
    /// Store `bytes` under `key`, overwriting any existing object.
    fn put(&self, key: &str, bytes: Bytes) -> Result<(), StoreError>;
}

impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    fn put(&self, key: &str, bytes: Bytes) -> Result<(), StoreError> {
        (**self).put(key, bytes)
    }
}

/// Connection settings for S3 and S3-compatible stores
#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Custom endpoint (MinIO, LocalStack, ...)
    pub endpoint: Option<String>,
    pub allow_http: bool,
}

/// [`BlobStore`] backed by an `object_store` implementation
#[derive(Clone)]
pub struct ObjectBlobStore {
    inner: Arc<dyn ObjectStore>,
    label: String,
}

impl std::fmt::Debug for ObjectBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBlobStore")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl ObjectBlobStore {
    pub fn new(inner: Arc<dyn ObjectStore>, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
        }
    }

    /// Amazon S3 (or S3-compatible when `endpoint` is set).
    ///
    /// Credentials left unset fall back to the standard AWS environment
    /// variables picked up by `AmazonS3Builder::from_env`.
    pub fn s3(settings: &S3Settings) -> Result<Self, StoreError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&settings.bucket)
            .with_region(&settings.region)
            .with_allow_http(settings.allow_http);

        if let Some(key_id) = &settings.access_key_id {
            builder = builder.with_access_key_id(key_id);
        }
        if let Some(secret) = &settings.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.with_endpoint(endpoint);
        }

        let store = builder.build().map_err(StoreError::from)?;
        Ok(Self::new(Arc::new(store), format!("s3://{}", settings.bucket)))
    }

    /// Local directory, created if missing. Used for dry runs.
    pub fn local(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| StoreError::new(format!("{}: {e}", dir.display()), false))?;
        let store = LocalFileSystem::new_with_prefix(dir).map_err(StoreError::from)?;
        Ok(Self::new(Arc::new(store), format!("file://{}", dir.display())))
    }

    /// Process-local memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory://")
    }

    /// Human-readable location, e.g. `s3://bucket`
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Fetch an object's full contents
    pub fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = parse_key(key)?;
        STORE_RUNTIME.block_on(async {
            let result = self.inner.get(&path).await?;
            result.bytes().await
        })
        .map_err(StoreError::from)
    }

    /// List object keys under `prefix`, sorted
    pub fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, StoreError> {
        use futures_util::TryStreamExt;

        let prefix = prefix.map(parse_key).transpose()?;
        let metas: Vec<_> = STORE_RUNTIME
            .block_on(self.inner.list(prefix.as_ref()).try_collect())
            .map_err(StoreError::from)?;
        let mut keys: Vec<String> = metas.into_iter().map(|m| m.location.to_string()).collect();
        keys.sort();
        Ok(keys)
    }
}

impl BlobStore for ObjectBlobStore {
    fn put(&self, key: &str, bytes: Bytes) -> Result<(), StoreError> {
        let path = parse_key(key)?;
        STORE_RUNTIME
            .block_on(self.inner.put(&path, PutPayload::from(bytes)))
            .map(|_| ())
            .map_err(StoreError::from)
    }
}

fn parse_key(key: &str) -> Result<ObjectPath, StoreError> {
    ObjectPath::parse(key).map_err(|e| StoreError::new(format!("invalid key {key:?}: {e}"), false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn in_memory_put_get_list() {
        let store = ObjectBlobStore::in_memory();
        store
            .put("raw/b.parquet", Bytes::from_static(b"bbb"))
            .unwrap();
        store
            .put("raw/a.parquet", Bytes::from_static(b"aaa"))
            .unwrap();

        assert_eq!(store.get("raw/a.parquet").unwrap().as_ref(), b"aaa");
        assert_eq!(
            store.list(Some("raw")).unwrap(),
            vec!["raw/a.parquet", "raw/b.parquet"]
        );
    }

    #[test]
    fn get_missing_not_retryable() {
        let store = ObjectBlobStore::in_memory();
        let err = store.get("nope.parquet").unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_key_not_retryable() {
        let store = ObjectBlobStore::in_memory();
        let err = store
            .put("a//b.parquet", Bytes::from_static(b"x"))
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn local_store_writes_files() {
        let dir = TempDir::new().unwrap();
        let store = ObjectBlobStore::local(&dir.path().join("out")).unwrap();
        store
            .put("raw/stock_batch_1_0.parquet", Bytes::from_static(b"PAR1"))
            .unwrap();

        let written = dir.path().join("out/raw/stock_batch_1_0.parquet");
        assert_eq!(std::fs::read(written).unwrap(), b"PAR1");
        assert!(store.label().starts_with("file://"));
    }

    #[test]
    fn s3_builder_accepts_explicit_settings() {
        let settings = S3Settings {
            bucket: "stock-raw".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: Some("AKIDEXAMPLE".to_string()),
            secret_access_key: Some("secret".to_string()),
            endpoint: Some("http://localhost:9000".to_string()),
            allow_http: true,
        };
        let store = ObjectBlobStore::s3(&settings).unwrap();
        assert_eq!(store.label(), "s3://stock-raw");
    }

    #[test]
    fn generic_error_retryable() {
        let err = StoreError::from(object_store::Error::Generic {
            store: "test",
            source: "connection reset".into(),
        });
        assert!(err.is_retryable());
    }
}
