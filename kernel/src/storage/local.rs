// Local filesystem blob store.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use super::{join_path, BlobStore, PathEntry, StoreError};

/// Stores every path as a file under `root`.
#[derive(Debug, Clone)]
pub struct LocalFsBlobStore {
    root: PathBuf,
}

impl LocalFsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(StoreError::InvalidPath(path.to_owned()));
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(path: &str, source: std::io::Error) -> StoreError {
    match source.kind() {
        ErrorKind::NotFound => StoreError::NotFound(path.to_owned()),
        ErrorKind::AlreadyExists => StoreError::AlreadyExists(path.to_owned()),
        _ => StoreError::Io {
            path: path.to_owned(),
            source,
        },
    }
}

#[async_trait]
impl BlobStore for LocalFsBlobStore {
    async fn create_file(&self, path: &str) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| io_error(path, e))?;
        }
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
            .map_err(|e| io_error(path, e))?;
        Ok(())
    }

    async fn append(&self, path: &str, offset: u64, data: Bytes) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        let mut file = OpenOptions::new()
            .write(true)
            .open(&target)
            .await
            .map_err(|e| io_error(path, e))?;

        let length = file.metadata().await.map_err(|e| io_error(path, e))?.len();
        if offset != length {
            return Err(StoreError::InvalidOffset {
                path: path.to_owned(),
                offset,
                length,
            });
        }

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| io_error(path, e))?;
        file.write_all(&data).await.map_err(|e| io_error(path, e))?;
        file.flush().await.map_err(|e| io_error(path, e))?;
        Ok(())
    }

    async fn flush(&self, path: &str, total_len: u64) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        let file = OpenOptions::new()
            .write(true)
            .open(&target)
            .await
            .map_err(|e| io_error(path, e))?;

        let length = file.metadata().await.map_err(|e| io_error(path, e))?.len();
        if length != total_len {
            return Err(StoreError::LengthMismatch {
                path: path.to_owned(),
                declared: total_len,
                length,
            });
        }
        file.sync_all().await.map_err(|e| io_error(path, e))
    }

    async fn read(&self, path: &str) -> Result<Bytes, StoreError> {
        let target = self.resolve(path)?;
        let data = fs::read(&target).await.map_err(|e| io_error(path, e))?;
        Ok(Bytes::from(data))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<PathEntry>, StoreError> {
        let dir = self.resolve(prefix)?;
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(prefix, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| io_error(prefix, e))? {
            let file_type = entry.file_type().await.map_err(|e| io_error(prefix, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(PathEntry {
                name: join_path(prefix, &name),
                is_directory: file_type.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn files_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsBlobStore::new(dir.path());

        store
            .write_new("t/_log/00000000000000000000.json", Bytes::from_static(b"{}\n"))
            .await
            .unwrap();

        let bytes = store.read("t/_log/00000000000000000000.json").await.unwrap();
        assert_eq!(bytes, Bytes::from_static(b"{}\n"));

        let entries = store.list("t").await.unwrap();
        assert_eq!(
            entries,
            vec![PathEntry {
                name: "t/_log".into(),
                is_directory: true
            }]
        );
    }

    #[tokio::test]
    async fn create_new_refuses_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsBlobStore::new(dir.path());

        store.create_file("t/a").await.unwrap();
        let err = store.create_file("t/a").await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn append_checks_offset_and_flush_checks_length() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsBlobStore::new(dir.path());

        store.create_file("a").await.unwrap();
        store.append("a", 0, Bytes::from_static(b"abc")).await.unwrap();
        store.append("a", 3, Bytes::from_static(b"de")).await.unwrap();

        assert!(matches!(
            store.append("a", 1, Bytes::from_static(b"x")).await,
            Err(StoreError::InvalidOffset { length: 5, .. })
        ));
        assert!(matches!(
            store.flush("a", 4).await,
            Err(StoreError::LengthMismatch { length: 5, .. })
        ));
        store.flush("a", 5).await.unwrap();
        assert_eq!(store.read("a").await.unwrap(), Bytes::from_static(b"abcde"));
    }

    #[tokio::test]
    async fn missing_paths_behave() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsBlobStore::new(dir.path());

        assert!(store.read("nope").await.unwrap_err().is_not_found());
        assert!(store.list("nope").await.unwrap().is_empty());
        assert!(matches!(
            store.read("../escape").await,
            Err(StoreError::InvalidPath(_))
        ));
    }
}
