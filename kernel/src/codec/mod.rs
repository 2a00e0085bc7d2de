// Columnar Codec
//
// One Parquet file per write batch. The encoder turns validated records
// into Arrow columns and serializes them in memory; the decoder reverses it.

pub mod decoder;
pub mod encoder;

pub use decoder::{decode, DecodeError};
pub use encoder::{ColumnarEncoder, EncodeError, EncodedFile, EncoderConfig};
