//! Record codecs.
//!
//! Both variants implement [`Codec`] and are chosen at runtime through
//! [`CodecKind`]:
//! - `json`: UTF-8 JSON text, the format of the original benchmark client
//! - `binary`: protobuf wire format for a fixed `Person` schema
//!
//! `encode` is total and deterministic. `decode` rejects malformed input
//! with a [`DecodeError`] and never panics.

pub mod binary;
pub mod json;

use crate::error::DecodeError;
use crate::record::Record;
use bytes::Bytes;
use serde::Deserialize;

pub use binary::BinaryCodec;
pub use json::JsonCodec;

/// Converts records to and from their serialized form.
pub trait Codec: Send + Sync {
    /// Short name used in logs and reports.
    fn name(&self) -> &'static str;

    fn encode(&self, record: &Record) -> Bytes;

    fn decode(&self, bytes: &[u8]) -> Result<Record, DecodeError>;
}

/// Codec selection as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Json,
    Binary,
}

impl CodecKind {
    pub fn codec(self) -> Box<dyn Codec> {
        match self {
            CodecKind::Json => Box::new(JsonCodec),
            CodecKind::Binary => Box::new(BinaryCodec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::RecordGenerator;

    #[test]
    fn test_generated_records_round_trip() {
        for kind in [CodecKind::Json, CodecKind::Binary] {
            let codec = kind.codec();
            for record in RecordGenerator::new(7, 500) {
                let encoded = codec.encode(&record);
                let decoded = codec.decode(&encoded).unwrap();
                assert_eq!(decoded, record, "codec {}", codec.name());
            }
        }
    }

    #[test]
    fn test_edge_records_round_trip() {
        let records = [
            Record::default(),
            Record::new("", 0).with_email(""),
            Record::new("Zoë \u{1F600}", -1),
            Record::new("max", i32::MAX).with_tags(["", "b", ""]),
            Record::new("min", i32::MIN).with_email("x@test.com"),
        ];

        for kind in [CodecKind::Json, CodecKind::Binary] {
            let codec = kind.codec();
            for record in &records {
                let decoded = codec.decode(&codec.encode(record)).unwrap();
                assert_eq!(&decoded, record, "codec {}", codec.name());
            }
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let record = Record::new("Harsha", 24).with_tags(["a", "b"]);
        for kind in [CodecKind::Json, CodecKind::Binary] {
            let codec = kind.codec();
            assert_eq!(codec.encode(&record), codec.encode(&record.clone()));
        }
    }

    #[test]
    fn test_codec_kind_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            codec: CodecKind,
        }
        let w: Wrapper = toml::from_str("codec = \"binary\"").unwrap();
        assert_eq!(w.codec, CodecKind::Binary);
        assert_eq!(w.codec.codec().name(), "binary");
    }
}
