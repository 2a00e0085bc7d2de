// Table Configuration
//
// Tunables for one table handle, loadable from JSON. Every field has a
// default, so `{}` is a valid configuration.

use std::time::Duration;

use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use serde::{Deserialize, Serialize};

use crate::codec::EncoderConfig;

/// Compression codec for data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionCodec {
    #[default]
    Snappy,
    Zstd,
    Gzip,
    None,
}

impl CompressionCodec {
    pub fn to_parquet(self) -> Compression {
        match self {
            CompressionCodec::Snappy => Compression::SNAPPY,
            CompressionCodec::Zstd => Compression::ZSTD(ZstdLevel::default()),
            CompressionCodec::Gzip => Compression::GZIP(GzipLevel::default()),
            CompressionCodec::None => Compression::UNCOMPRESSED,
        }
    }

    /// Infix used in data file names, e.g. `part-…-c000.snappy.parquet`.
    pub fn file_infix(self) -> Option<&'static str> {
        match self {
            CompressionCodec::Snappy => Some("snappy"),
            CompressionCodec::Zstd => Some("zstd"),
            CompressionCodec::Gzip => Some("gz"),
            CompressionCodec::None => None,
        }
    }
}

/// Table configuration loaded from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableConfig {
    /// Log sub-path under the table root.
    pub log_dir: String,
    /// Deadline for each blob store call. `None` waits forever.
    pub operation_timeout_ms: Option<u64>,
    pub compression: CompressionCodec,
    pub max_row_group_size: usize,
    /// Also require per-field type agreement across a batch.
    pub strict_field_types: bool,
    /// Let a write create the table (version 0) from the batch's inferred
    /// schema when no log exists yet.
    pub auto_create: bool,
    /// Recorded in every `commitInfo`.
    pub engine_info: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl TableConfig {
    /// Default built-in configuration (used if no config is provided).
    pub fn default_config() -> Self {
        Self {
            log_dir: "_log".into(),
            operation_timeout_ms: None,
            compression: CompressionCodec::Snappy,
            max_row_group_size: 1024 * 1024,
            strict_field_types: false,
            auto_create: false,
            engine_info: concat!("lakelog/", env!("CARGO_PKG_VERSION")).into(),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            compression: self.compression.to_parquet(),
            max_row_group_size: self.max_row_group_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_is_the_default() {
        assert_eq!(TableConfig::from_json_str("{}").unwrap(), TableConfig::default());
    }

    #[test]
    fn fields_override_individually() {
        let config = TableConfig::from_json_str(
            r#"{"compression": "zstd", "operation_timeout_ms": 1500, "auto_create": true}"#,
        )
        .unwrap();

        assert_eq!(config.compression, CompressionCodec::Zstd);
        assert_eq!(config.operation_timeout(), Some(Duration::from_millis(1500)));
        assert!(config.auto_create);
        assert_eq!(config.log_dir, "_log");
        assert!(matches!(config.encoder_config().compression, Compression::ZSTD(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(TableConfig::from_json_str(r#"{"log_directory": "x"}"#).is_err());
    }

    #[test]
    fn engine_info_names_the_crate_version() {
        assert!(TableConfig::default().engine_info.starts_with("lakelog/"));
    }
}
