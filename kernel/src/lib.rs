// Lakelog Kernel
//
// Versioned columnar tables over a blob store. Every change is an
// immutable, numbered log entry; table state is rebuilt by replay.

pub mod codec;
pub mod config;
pub mod error;
pub mod invariants;
pub mod log;
pub mod replay;
pub mod schema;
pub mod state;
pub mod storage;
pub mod table;
pub mod value;

pub use config::TableConfig;
pub use error::{TableError, TableResult};
pub use log::Version;
pub use schema::{DataType, Field, Schema};
pub use table::{CreateOptions, Table, WriteOutcome};
pub use value::{Record, Value};
