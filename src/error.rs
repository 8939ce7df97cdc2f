//! Error types shared by the transport, codecs, driver and server.
//!
//! End-of-stream between frames is not an error: `receive` reports it as
//! `Ok(None)`. Everything here is surfaced to the caller without retries.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Which part of a frame was being read when the stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePart {
    /// The 4-byte length prefix.
    Prefix,
    /// The payload following the prefix.
    Payload,
}

impl std::fmt::Display for FramePart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramePart::Prefix => f.write_str("length prefix"),
            FramePart::Payload => f.write_str("payload"),
        }
    }
}

/// Failures of the framed transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Read or write failure on an open stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream in the middle of a frame.
    #[error("connection closed mid-frame: got {received} of {expected} {part} bytes")]
    Incomplete {
        part: FramePart,
        expected: usize,
        received: usize,
    },

    /// A frame longer than the connection accepts (or than a u32 can describe).
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: u64, max: u64 },

    /// No complete frame arrived before the receive deadline.
    #[error("receive timed out after {after:?} ({received} bytes of current frame read)")]
    Timeout { after: Duration, received: usize },
}

/// Malformed payload handed to a codec.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid UTF-8 at byte {valid_up_to}: {source}")]
    Utf8 {
        valid_up_to: usize,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("invalid JSON record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("buffer truncated at offset {offset}: needed {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("varint at offset {offset} exceeds 10 bytes")]
    VarintOverflow { offset: usize },

    #[error("invalid field tag {tag:#x} at offset {offset}")]
    InvalidTag { tag: u64, offset: usize },

    #[error("field {field} has wire type {actual}, expected {expected} (offset {offset})")]
    WireTypeMismatch {
        field: u32,
        expected: u8,
        actual: u8,
        offset: usize,
    },

    #[error("age value {value:#x} does not fit in 32 bits")]
    AgeOutOfRange { value: u64 },
}

/// A benchmark run that did not complete all of its round trips.
///
/// `completed` is always the number of acknowledged round trips.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("transport failed after {completed} round trips: {source}")]
    Transport {
        completed: u64,
        #[source]
        source: TransportError,
    },

    #[error("server closed the connection after {completed} round trips")]
    ConnectionClosed { completed: u64 },

    #[error("record source exhausted after {completed} round trips")]
    RecordsExhausted { completed: u64 },
}

impl BenchError {
    /// Round trips that finished before the run aborted.
    pub fn completed(&self) -> u64 {
        match self {
            BenchError::Transport { completed, .. }
            | BenchError::ConnectionClosed { completed }
            | BenchError::RecordsExhausted { completed } => *completed,
        }
    }
}

/// Echo server failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("session with {peer} failed after {frames} frames: {source}")]
    Transport {
        peer: String,
        frames: u64,
        #[source]
        source: TransportError,
    },

    #[error("session with {peer} aborted on malformed frame {frame}: {source}")]
    Decode {
        peer: String,
        frame: u64,
        #[source]
        source: DecodeError,
    },
}
