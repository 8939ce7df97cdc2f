//! Length-prefixed framing over a blocking byte stream.
//!
//! Wire format, repeated:
//!
//! ```text
//! +----------------------+---------------------------+
//! | length (4B, BE u32)  | payload (exactly length B) |
//! +----------------------+---------------------------+
//! ```
//!
//! A single `read` on a TCP stream may return any prefix of what the peer
//! wrote, or several writes coalesced together. `receive_frame` accumulates
//! until the declared length is reached, so callers only ever see whole
//! frames. A stream that ends exactly on a frame boundary yields `Ok(None)`;
//! a stream that ends anywhere else is an `Incomplete` error.

use crate::error::{FramePart, TransportError};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::trace;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Payload of the acknowledgment frame the echo server sends per frame.
pub const ACK: &[u8] = b"ACK";

/// Upper bound on a single payload read, so a large declared length does
/// not allocate its whole buffer before the bytes actually arrive.
const READ_CHUNK: usize = 64 * 1024;

/// Write one frame: length prefix followed by `payload`.
///
/// The prefix and payload go out in a single `write_all` so a frame is
/// never split across two small segments by the sender.
pub fn send_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError> {
    let len = u32::try_from(payload.len()).map_err(|_| TransportError::FrameTooLarge {
        len: payload.len() as u64,
        max: u32::MAX as u64,
    })?;

    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    frame.put_u32(len);
    frame.extend_from_slice(payload);

    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame, rejecting declared lengths above `max_len`.
///
/// Returns `Ok(None)` if the stream was closed cleanly before the first
/// prefix byte.
pub fn receive_frame<R: Read>(
    reader: &mut R,
    max_len: u32,
) -> Result<Option<Bytes>, TransportError> {
    read_frame(reader, max_len, None)
}

fn read_frame<R: Read>(
    reader: &mut R,
    max_len: u32,
    timeout: Option<Duration>,
) -> Result<Option<Bytes>, TransportError> {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    let mut filled = 0;
    fill(reader, &mut prefix, &mut filled).map_err(|e| io_failure(e, timeout, filled))?;

    if filled == 0 {
        return Ok(None);
    }
    if filled < LENGTH_PREFIX_LEN {
        return Err(TransportError::Incomplete {
            part: FramePart::Prefix,
            expected: LENGTH_PREFIX_LEN,
            received: filled,
        });
    }

    let length = u32::from_be_bytes(prefix);
    if length > max_len {
        return Err(TransportError::FrameTooLarge {
            len: length as u64,
            max: max_len as u64,
        });
    }
    let length = length as usize;

    let mut payload = BytesMut::with_capacity(length.min(READ_CHUNK));
    let mut received = 0;
    while received < length {
        let chunk = (length - received).min(READ_CHUNK);
        payload.resize(received + chunk, 0);

        let mut got = 0;
        let result = fill(reader, &mut payload[received..received + chunk], &mut got);
        received += got;
        result.map_err(|e| io_failure(e, timeout, LENGTH_PREFIX_LEN + received))?;

        if got < chunk {
            return Err(TransportError::Incomplete {
                part: FramePart::Payload,
                expected: length,
                received,
            });
        }
    }

    trace!(len = length, "frame received");
    Ok(Some(payload.freeze()))
}

/// Read into `buf[*filled..]` until it is full or the stream reports EOF.
///
/// `*filled` always reflects the bytes actually stored, including when an
/// error is returned.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8], filled: &mut usize) -> io::Result<()> {
    while *filled < buf.len() {
        match reader.read(&mut buf[*filled..]) {
            Ok(0) => break,
            Ok(n) => *filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn io_failure(e: io::Error, timeout: Option<Duration>, received: usize) -> TransportError {
    match (timeout, e.kind()) {
        (Some(after), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            TransportError::Timeout { after, received }
        }
        _ => TransportError::Io(e),
    }
}

/// A single framed connection, owning its stream.
///
/// Exactly one send/receive pair is expected to be in flight at a time; the
/// exclusive `&mut self` receivers enforce that.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    max_frame_len: u32,
    receive_timeout: Option<Duration>,
    frames_sent: u64,
    frames_received: u64,
}

impl<S: Read + Write> Connection<S> {
    /// Wrap an already-connected stream. No frame length limit beyond `u32::MAX`.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            max_frame_len: u32::MAX,
            receive_timeout: None,
            frames_sent: 0,
            frames_received: 0,
        }
    }

    /// Reject incoming frames that declare more than `max` payload bytes.
    pub fn with_max_frame_len(mut self, max: u32) -> Self {
        self.max_frame_len = max;
        self
    }

    /// Send one frame.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        send_frame(&mut self.stream, payload)?;
        self.frames_sent += 1;
        trace!(len = payload.len(), "frame sent");
        Ok(())
    }

    /// Receive one frame; `Ok(None)` means the peer closed between frames.
    ///
    /// After a `Timeout` the stream position is unknown and the connection
    /// should be dropped.
    pub fn receive(&mut self) -> Result<Option<Bytes>, TransportError> {
        let frame = read_frame(&mut self.stream, self.max_frame_len, self.receive_timeout)?;
        if frame.is_some() {
            self.frames_received += 1;
        }
        Ok(frame)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl Connection<TcpStream> {
    /// Connect to `addr` with Nagle's algorithm disabled.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        Self::from_tcp(stream)
    }

    /// Wrap an accepted or connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    /// Bound every subsequent `receive`; `None` blocks indefinitely.
    pub fn set_receive_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.stream.set_read_timeout(timeout)?;
        self.receive_timeout = timeout;
        Ok(())
    }

    /// Receive one frame, failing with `Timeout` if it takes longer than `deadline`
    /// between reads. The previous timeout setting is restored afterwards.
    pub fn receive_within(&mut self, deadline: Duration) -> Result<Option<Bytes>, TransportError> {
        let previous = self.receive_timeout;
        self.set_receive_timeout(Some(deadline))?;
        let result = self.receive();
        self.set_receive_timeout(previous)?;
        result
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.stream.peer_addr()?)
    }
}
