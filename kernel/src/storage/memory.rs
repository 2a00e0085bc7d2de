// In-memory blob store.
//
// Mirrors data-lake append/flush semantics: appended bytes are staged and
// only become readable once flushed.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{BlobStore, PathEntry, StoreError};

#[derive(Debug, Default)]
struct Blob {
    data: Vec<u8>,
    flushed: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Blob>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All file paths currently in the store, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.blobs.read().keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn create_file(&self, path: &str) -> Result<(), StoreError> {
        let mut blobs = self.blobs.write();
        if blobs.contains_key(path) {
            return Err(StoreError::AlreadyExists(path.to_owned()));
        }
        blobs.insert(path.to_owned(), Blob::default());
        Ok(())
    }

    async fn append(&self, path: &str, offset: u64, data: Bytes) -> Result<(), StoreError> {
        let mut blobs = self.blobs.write();
        let blob = blobs
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_owned()))?;

        let length = blob.data.len() as u64;
        if offset != length {
            return Err(StoreError::InvalidOffset {
                path: path.to_owned(),
                offset,
                length,
            });
        }
        blob.data.extend_from_slice(&data);
        Ok(())
    }

    async fn flush(&self, path: &str, total_len: u64) -> Result<(), StoreError> {
        let mut blobs = self.blobs.write();
        let blob = blobs
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_owned()))?;

        let length = blob.data.len() as u64;
        if total_len != length {
            return Err(StoreError::LengthMismatch {
                path: path.to_owned(),
                declared: total_len,
                length,
            });
        }
        blob.flushed = blob.data.len();
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Bytes, StoreError> {
        let blobs = self.blobs.read();
        let blob = blobs
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_owned()))?;
        Ok(Bytes::copy_from_slice(&blob.data[..blob.flushed]))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<PathEntry>, StoreError> {
        let dir = prefix.trim_end_matches('/');
        let dir_prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let blobs = self.blobs.read();
        let mut entries: Vec<PathEntry> = Vec::new();
        for key in blobs.keys().filter(|k| k.starts_with(&dir_prefix)) {
            let rest = &key[dir_prefix.len()..];
            let entry = match rest.split_once('/') {
                Some((child_dir, _)) => PathEntry {
                    name: format!("{dir_prefix}{child_dir}"),
                    is_directory: true,
                },
                None => PathEntry {
                    name: key.clone(),
                    is_directory: false,
                },
            };
            if entries.last() != Some(&entry) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}
