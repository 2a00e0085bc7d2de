use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;

use lakelog_kernel::invariants::BatchError;
use lakelog_kernel::log::{entry_file_name, Action, Protocol};
use lakelog_kernel::storage::{BlobStore, InMemoryBlobStore, LocalFsBlobStore, PathEntry, StoreError};
use lakelog_kernel::{
    CreateOptions, DataType, Field, Record, Schema, Table, TableConfig, TableError, Value,
};

fn records(rows: serde_json::Value) -> Vec<Record> {
    rows.as_array()
        .unwrap()
        .iter()
        .map(|r| Record::from_json(r).unwrap())
        .collect()
}

fn people_schema() -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Long),
        Field::new("name", DataType::String),
    ])
}

fn memory_table() -> (Arc<InMemoryBlobStore>, Table) {
    let store = Arc::new(InMemoryBlobStore::new());
    let table = Table::open(store.clone(), "t");
    (store, table)
}

/// Yields to the scheduler before every call so concurrent writers
/// interleave one store call at a time.
struct YieldingStore {
    inner: Arc<InMemoryBlobStore>,
}

#[async_trait]
impl BlobStore for YieldingStore {
    async fn create_file(&self, path: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.create_file(path).await
    }

    async fn append(&self, path: &str, offset: u64, data: Bytes) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.append(path, offset, data).await
    }

    async fn flush(&self, path: &str, total_len: u64) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.flush(path, total_len).await
    }

    async fn read(&self, path: &str) -> Result<Bytes, StoreError> {
        tokio::task::yield_now().await;
        self.inner.read(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<PathEntry>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.list(prefix).await
    }
}

/// Never completes a flush under the log directory.
struct StalledLogStore {
    inner: Arc<InMemoryBlobStore>,
}

#[async_trait]
impl BlobStore for StalledLogStore {
    async fn create_file(&self, path: &str) -> Result<(), StoreError> {
        self.inner.create_file(path).await
    }

    async fn append(&self, path: &str, offset: u64, data: Bytes) -> Result<(), StoreError> {
        self.inner.append(path, offset, data).await
    }

    async fn flush(&self, path: &str, total_len: u64) -> Result<(), StoreError> {
        if path.contains("/_log/") && !path.ends_with(&entry_file_name(0)) {
            std::future::pending::<()>().await;
        }
        self.inner.flush(path, total_len).await
    }

    async fn read(&self, path: &str) -> Result<Bytes, StoreError> {
        self.inner.read(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<PathEntry>, StoreError> {
        self.inner.list(prefix).await
    }
}

#[tokio::test]
async fn create_write_read_roundtrip() {
    let (store, table) = memory_table();
    table.create(&people_schema(), CreateOptions::default()).await.unwrap();

    let batch = records(json!([
        {"id": 1, "name": "Alice"},
        {"id": 2, "name": "Bob"},
    ]));
    let outcome = table.write_batch(&batch).await.unwrap();

    assert_eq!(outcome.version, 1);
    assert_eq!(table.read().await.unwrap(), batch);
    assert_eq!(table.latest_version().await.unwrap(), Some(1));

    let log_files: Vec<_> = store
        .paths()
        .into_iter()
        .filter(|p| p.starts_with("t/_log/"))
        .collect();
    assert_eq!(
        log_files,
        vec![
            "t/_log/00000000000000000000.json",
            "t/_log/00000000000000000001.json",
        ]
    );
}

#[tokio::test]
async fn versions_increase_by_one_per_write() {
    let (_, table) = memory_table();
    table.create(&people_schema(), CreateOptions::default()).await.unwrap();

    for expected in 1..=4u64 {
        let batch = records(json!([{"id": expected, "name": "x"}]));
        assert_eq!(table.write_batch(&batch).await.unwrap().version, expected);
    }

    let ids: Vec<_> = table
        .read()
        .await
        .unwrap()
        .iter()
        .map(|r| r.get("id").cloned())
        .collect();
    assert_eq!(
        ids,
        (1..=4).map(|i| Some(Value::Int(i))).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn mismatched_batch_names_the_offending_record() {
    let (store, table) = memory_table();
    table.create(&people_schema(), CreateOptions::default()).await.unwrap();
    let before = store.paths();

    let err = table
        .write_batch(&records(json!([{"a": 1, "b": 2}, {"a": 1, "c": 3}])))
        .await
        .unwrap_err();

    match err {
        TableError::Batch(BatchError::SchemaMismatch { index, .. }) => assert_eq!(index, 1),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.paths(), before);
    assert_eq!(table.latest_version().await.unwrap(), Some(0));
}

#[tokio::test]
async fn empty_batch_is_rejected() {
    let (_, table) = memory_table();
    table.create(&people_schema(), CreateOptions::default()).await.unwrap();

    let err = table.write_batch(&[]).await.unwrap_err();
    assert!(matches!(err, TableError::Batch(BatchError::Empty)));
}

#[tokio::test]
async fn missing_and_fresh_tables_read_empty() {
    let (_, table) = memory_table();
    assert!(table.read().await.unwrap().is_empty());
    assert_eq!(table.latest_version().await.unwrap(), None);

    table.create(&people_schema(), CreateOptions::default()).await.unwrap();
    assert!(table.read().await.unwrap().is_empty());
}

#[tokio::test]
async fn reads_are_repeatable() {
    let (_, table) = memory_table();
    table.create(&people_schema(), CreateOptions::default()).await.unwrap();
    table
        .write_batch(&records(json!([{"id": 1, "name": "a"}, {"id": 2, "name": null}])))
        .await
        .unwrap();

    let first = table.read().await.unwrap();
    let second = table.read().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first[1].get("name"), Some(&Value::Null));
}

#[tokio::test]
async fn nested_values_survive_storage() {
    let store = Arc::new(InMemoryBlobStore::new());
    let config = TableConfig {
        auto_create: true,
        ..TableConfig::default()
    };
    let table = Table::with_config(store, "events", config);

    let batch = records(json!([
        {
            "id": 1,
            "tags": ["a", "b"],
            "owner": {"name": "Alice", "age": 31},
            "at": "2024-03-01T12:30:00.250Z",
            "score": 0.5
        },
        {
            "id": 2,
            "tags": [],
            "owner": {"name": "Bob", "age": null},
            "at": "2024-03-02T00:00:00Z",
            "score": 2
        },
    ]));
    table.write_batch(&batch).await.unwrap();

    let read = table.read().await.unwrap();
    assert_eq!(read.len(), 2);
    assert_eq!(
        read[0].get("tags"),
        Some(&Value::List(vec!["a".into(), "b".into()]))
    );
    assert_eq!(read[1].get("tags"), Some(&Value::List(vec![])));
    assert_eq!(
        read[1].get("owner"),
        Some(&Value::Struct(Record::new().with("name", "Bob").with("age", Value::Null)))
    );
    assert_eq!(read[1].get("score"), Some(&Value::Float(2.0)));
    assert_eq!(
        read[0].get("at").unwrap().to_json(),
        json!("2024-03-01T12:30:00.250Z")
    );
}

#[tokio::test]
async fn racing_writers_get_one_conflict() {
    let inner = Arc::new(InMemoryBlobStore::new());
    let store: Arc<dyn BlobStore> = Arc::new(YieldingStore {
        inner: inner.clone(),
    });
    let a = Table::open(store.clone(), "t");
    let b = Table::open(store, "t");
    a.create(&people_schema(), CreateOptions::default()).await.unwrap();

    let batch_a = records(json!([{"id": 1, "name": "a"}]));
    let batch_b = records(json!([{"id": 2, "name": "b"}]));
    let (ra, rb) = tokio::join!(a.write_batch(&batch_a), b.write_batch(&batch_b));

    let (won, lost) = match (ra, rb) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        (ra, rb) => panic!("expected exactly one winner, got {ra:?} / {rb:?}"),
    };
    assert_eq!(won.version, 1);
    assert!(matches!(lost, TableError::VersionConflict { version: 1 }));
    assert!(lost.is_retryable());

    // The loser's data file is orphaned, not referenced.
    assert_eq!(a.read().await.unwrap().len(), 1);
    let data_files = inner
        .paths()
        .into_iter()
        .filter(|p| p.ends_with(".parquet"))
        .count();
    assert_eq!(data_files, 2);

    // A retry on top of the winner succeeds.
    let retry = b.write_batch(&batch_b).await.unwrap();
    assert_eq!(retry.version, 2);
    assert_eq!(b.read().await.unwrap().len(), 2);
}

#[tokio::test]
async fn committing_a_taken_version_conflicts() {
    let (_, table) = memory_table();
    table.create(&people_schema(), CreateOptions::default()).await.unwrap();

    let err = table
        .log()
        .commit_version(0, &[Action::Protocol(Protocol::default())])
        .await
        .unwrap_err();
    assert!(matches!(
        TableError::from(err),
        TableError::VersionConflict { version: 0 }
    ));
}

#[tokio::test]
async fn lost_data_files_degrade_reads() {
    let (store, table) = memory_table();
    table.create(&people_schema(), CreateOptions::default()).await.unwrap();
    table
        .write_batch(&records(json!([{"id": 1, "name": "a"}])))
        .await
        .unwrap();
    table
        .write_batch(&records(json!([{"id": 2, "name": "b"}])))
        .await
        .unwrap();

    // Overwrite the second file's contents by swapping in a fresh store
    // that lacks it.
    let survivor = Arc::new(InMemoryBlobStore::new());
    let state = table.snapshot().await.unwrap();
    for path in store.paths() {
        if path.ends_with(&state.files[1].path) {
            continue;
        }
        let data = store.read(&path).await.unwrap();
        survivor.write_new(&path, data).await.unwrap();
    }

    let damaged = Table::open(survivor, "t");
    let scan = damaged.scan(None).await.unwrap();
    assert_eq!(scan.records.len(), 1);
    assert_eq!(scan.records[0].get("id"), Some(&Value::Int(1)));
    assert_eq!(scan.skipped.len(), 1);
}

#[tokio::test]
async fn writes_require_an_existing_table() {
    let (_, table) = memory_table();
    let err = table
        .write_batch(&records(json!([{"id": 1}])))
        .await
        .unwrap_err();
    assert!(matches!(err, TableError::TableNotFound(root) if root == "t"));
}

#[tokio::test]
async fn tables_are_created_once() {
    let (_, table) = memory_table();
    table.create(&people_schema(), CreateOptions::default()).await.unwrap();

    let err = table
        .create(&people_schema(), CreateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TableError::TableAlreadyExists(_)));

    let err = table
        .create(&Schema::new(vec![]), CreateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TableError::InvalidSchema(_)));
}

#[tokio::test]
async fn history_and_time_travel() {
    let (_, table) = memory_table();
    let options = CreateOptions {
        name: Some("people".into()),
        description: Some("test table".into()),
        ..Default::default()
    };
    table.create(&people_schema(), options).await.unwrap();
    table
        .write_batch(&records(json!([{"id": 1, "name": "a"}])))
        .await
        .unwrap();
    table
        .write_batch(&records(json!([{"id": 2, "name": "b"}, {"id": 3, "name": "c"}])))
        .await
        .unwrap();

    let history = table.history().await.unwrap();
    let operations: Vec<_> = history.iter().map(|(_, c)| c.operation.as_str()).collect();
    assert_eq!(operations, vec!["CREATE TABLE", "WRITE", "WRITE"]);
    assert_eq!(history[2].1.read_version, Some(1));

    assert_eq!(table.read_at(1).await.unwrap().len(), 1);
    assert_eq!(table.snapshot_at(2).await.unwrap().row_count(), 3);

    let err = table.read_at(7).await.unwrap_err();
    assert!(matches!(err, TableError::VersionNotFound { requested: 7, .. }));

    let state = table.snapshot().await.unwrap();
    let meta = state.metadata.unwrap();
    assert_eq!(meta.name.as_deref(), Some("people"));
}

#[tokio::test]
async fn stalled_commits_report_an_unknown_outcome() {
    let inner = Arc::new(InMemoryBlobStore::new());
    let config = TableConfig {
        operation_timeout_ms: Some(50),
        ..TableConfig::default()
    };
    let table = Table::with_config(
        Arc::new(StalledLogStore {
            inner: inner.clone(),
        }),
        "t",
        config,
    );
    table.create(&people_schema(), CreateOptions::default()).await.unwrap();

    let err = table
        .write_batch(&records(json!([{"id": 1, "name": "a"}])))
        .await
        .unwrap_err();

    assert!(matches!(err, TableError::CommitOutcomeUnknown { version: 1, .. }));
    assert!(err.is_retryable());
    // The entry file exists but was never flushed, so it reads as empty.
    assert!(inner.paths().contains(&"t/_log/00000000000000000001.json".to_owned()));
    assert!(Table::open(inner, "t").read().await.unwrap().is_empty());
}

#[tokio::test]
async fn local_directory_tables_persist_across_handles() {
    let dir = tempfile::tempdir().unwrap();

    {
        let table = Table::open(Arc::new(LocalFsBlobStore::new(dir.path())), "warehouse/people");
        table.create(&people_schema(), CreateOptions::default()).await.unwrap();
        table
            .write_batch(&records(json!([{"id": 1, "name": "Alice"}])))
            .await
            .unwrap();
    }

    assert!(dir
        .path()
        .join("warehouse/people/_log/00000000000000000001.json")
        .exists());

    let reopened = Table::open(Arc::new(LocalFsBlobStore::new(dir.path())), "warehouse/people");
    assert_eq!(reopened.latest_version().await.unwrap(), Some(1));
    assert_eq!(
        reopened.read().await.unwrap(),
        records(json!([{"id": 1, "name": "Alice"}]))
    );
}

#[tokio::test]
async fn files_with_fewer_columns_read_without_those_keys() {
    let (_, table) = memory_table();
    table.create(&people_schema(), CreateOptions::default()).await.unwrap();
    table
        .write_batch(&records(json!([{"id": 1}])))
        .await
        .unwrap();
    table
        .write_batch(&records(json!([{"id": 2, "name": "b"}])))
        .await
        .unwrap();

    let read = table.read().await.unwrap();

    assert_eq!(read.len(), 2);
    assert_eq!(read[0].get("id"), Some(&Value::Int(1)));
    assert_eq!(read[0].get("name"), None);
    assert_eq!(read[0].len(), 1);
    assert_eq!(read[1].get("name"), Some(&Value::String("b".into())));
}

#[tokio::test]
async fn nested_keys_unknown_to_the_batch_schema_fail_the_write() {
    let (store, table) = memory_table();
    table.create(&people_schema(), CreateOptions::default()).await.unwrap();
    let before = store.paths();

    let err = table
        .write_batch(&records(json!([
            {"addr": {"city": "A"}},
            {"addr": {"city": "B", "zip": "123"}}
        ])))
        .await
        .unwrap_err();

    assert!(matches!(err, TableError::Encoding(_)));
    assert!(err.to_string().contains("zip"), "{err}");
    assert_eq!(store.paths(), before);
}

#[tokio::test]
async fn large_whole_floats_keep_their_value() {
    let (_, table) = memory_table();
    table.create(&people_schema(), CreateOptions::default()).await.unwrap();

    table
        .write_batch(&records(json!([{"x": 1e20}])))
        .await
        .unwrap();

    let read = table.read().await.unwrap();
    assert_eq!(read[0].get("x"), Some(&Value::Float(1e20)));
}
