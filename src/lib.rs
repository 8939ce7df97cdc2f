//! wirebench: framed TCP round-trip benchmarking
//!
//! Components:
//! - `transport`: 4-byte big-endian length-prefixed frames over a blocking stream
//! - `codec`: JSON text and protobuf-compatible binary record encodings
//! - `generator`: seeded synthetic record stream
//! - `bench`: request/ACK round-trip driver and result statistics
//! - `server`: single-connection echo server answering every frame with `ACK`

pub mod bench;
pub mod codec;
pub mod config;
pub mod error;
pub mod generator;
pub mod record;
pub mod server;
pub mod transport;

pub use bench::{BenchmarkResult, Driver};
pub use codec::{Codec, CodecKind};
pub use error::{BenchError, DecodeError, ServerError, TransportError};
pub use generator::RecordGenerator;
pub use record::Record;
pub use server::EchoServer;
pub use transport::{Connection, ACK};
