//! JSON text codec.

use super::Codec;
use crate::error::DecodeError;
use crate::record::Record;
use bytes::Bytes;

/// Compact JSON: `{"name":"...","age":N,"email":"...","tags":[...]}`.
///
/// `email` is omitted when absent and `tags` when empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, record: &Record) -> Bytes {
        // Record holds only strings and integers, serialization cannot fail.
        serde_json::to_vec(record).map(Bytes::from).unwrap_or_default()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Record, DecodeError> {
        let text = std::str::from_utf8(bytes).map_err(|e| DecodeError::Utf8 {
            valid_up_to: e.valid_up_to(),
            source: e,
        })?;
        Ok(serde_json::from_str(text)?)
    }
}
