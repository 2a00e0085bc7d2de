// Blob Storage Abstraction
//
// The engine's only shared mutable resource. Implementations may persist
// to disk, object storage, an in-memory map, etc.
//
// Properties required from implementations:
// - `create_file` is create-only: it fails if the path exists
// - Bytes are only ever appended at the current end of a file
// - Nothing is deleted or rewritten in place

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub mod local;
pub mod memory;

pub use local::LocalFsBlobStore;
pub use memory::InMemoryBlobStore;

/// Errors surfaced by a blob store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("path already exists: {0}")]
    AlreadyExists(String),

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("append to {path} at offset {offset}, but its length is {length}")]
    InvalidOffset {
        path: String,
        offset: u64,
        length: u64,
    },

    #[error("flush of {path} declared {declared} bytes, but {length} were appended")]
    LengthMismatch {
        path: String,
        declared: u64,
        length: u64,
    },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("{operation} on {path} timed out after {elapsed_ms} ms")]
    Timeout {
        operation: &'static str,
        path: String,
        elapsed_ms: u64,
    },

    #[error("i/o error on {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// One entry returned by [`BlobStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    /// Full path of the entry, including the listed prefix.
    pub name: String,
    pub is_directory: bool,
}

impl PathEntry {
    /// Last path segment.
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Storage backend for log entries and data files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create an empty file. Fails with [`StoreError::AlreadyExists`] if
    /// the path is taken.
    async fn create_file(&self, path: &str) -> Result<(), StoreError>;

    /// Append bytes at `offset`, which must equal the current length.
    async fn append(&self, path: &str, offset: u64, data: Bytes) -> Result<(), StoreError>;

    /// Make the first `total_len` bytes durable and readable.
    async fn flush(&self, path: &str, total_len: u64) -> Result<(), StoreError>;

    /// Read a whole file.
    async fn read(&self, path: &str) -> Result<Bytes, StoreError>;

    /// List the direct children of a directory. A missing directory lists
    /// as empty.
    async fn list(&self, prefix: &str) -> Result<Vec<PathEntry>, StoreError>;

    /// Create, fill and flush a new file in one sequence.
    async fn write_new(&self, path: &str, data: Bytes) -> Result<(), StoreError> {
        let len = data.len() as u64;
        self.create_file(path).await?;
        self.append(path, 0, data).await?;
        self.flush(path, len).await
    }
}

/// Applies a deadline to every call of the wrapped store.
pub struct TimeoutStore {
    inner: Arc<dyn BlobStore>,
    limit: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn BlobStore>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn run<T, F>(&self, operation: &'static str, path: &str, fut: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, StoreError>> + Send,
    {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, path, limit_ms = self.limit.as_millis() as u64, "blob store call timed out");
                Err(StoreError::Timeout {
                    operation,
                    path: path.to_owned(),
                    elapsed_ms: self.limit.as_millis() as u64,
                })
            }
        }
    }
}

#[async_trait]
impl BlobStore for TimeoutStore {
    async fn create_file(&self, path: &str) -> Result<(), StoreError> {
        self.run("create", path, self.inner.create_file(path)).await
    }

    async fn append(&self, path: &str, offset: u64, data: Bytes) -> Result<(), StoreError> {
        self.run("append", path, self.inner.append(path, offset, data)).await
    }

    async fn flush(&self, path: &str, total_len: u64) -> Result<(), StoreError> {
        self.run("flush", path, self.inner.flush(path, total_len)).await
    }

    async fn read(&self, path: &str) -> Result<Bytes, StoreError> {
        self.run("read", path, self.inner.read(path)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<PathEntry>, StoreError> {
        self.run("list", prefix, self.inner.list(prefix)).await
    }
}

/// Joins path segments with `/`, ignoring empty segments and stray slashes.
pub fn join_path(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    match (base.is_empty(), child.is_empty()) {
        (true, _) => child.to_owned(),
        (_, true) => base.to_owned(),
        _ => format!("{base}/{child}"),
    }
}
