//! Single-connection echo server.
//!
//! Accepts one connection at a time, reads frames and answers each one
//! with an `ACK` frame. Payloads are acknowledged without inspection unless
//! a decode codec is configured.
//!
//! ```text
//! Listening --accept--> Accepted --> Serving --EOF/expected/error--> Closed
//!     ^                                                               |
//!     +---------------------- keep_listening -------------------------+
//! ```

use crate::codec::Codec;
use crate::config::{DecodeErrorPolicy, ServerConfig};
use crate::error::ServerError;
use crate::transport::{Connection, ACK};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of the server's current connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Listening,
    Accepted,
    Serving,
    Closed,
}

/// Statistics for one finished session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub peer: String,
    pub frames: u64,
    pub bytes: u64,
    pub malformed: u64,
    pub elapsed: Duration,
}

impl SessionSummary {
    /// Frames per second over the session lifetime.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

/// Echo server instance
pub struct EchoServer {
    listener: TcpListener,
    config: ServerConfig,
    decoder: Option<Box<dyn Codec>>,
    state: ServerState,
}

impl EchoServer {
    /// Bind the listening socket.
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = create_listener(&config.listen).map_err(|source| ServerError::Bind {
            addr: config.listen.clone(),
            source,
        })?;
        let decoder = config.decode.map(|kind| kind.codec());

        info!(
            address = %config.listen,
            decode = decoder.as_ref().map(|c| c.name()),
            expected = config.expected,
            keep_listening = config.keep_listening,
            "Server listening"
        );

        Ok(Self {
            listener,
            config,
            decoder,
            state: ServerState::Listening,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Serve one connection, or keep accepting if `keep_listening` is set.
    ///
    /// With `keep_listening`, a failed session is logged and the server
    /// returns to `Listening`; only accept failures end the loop.
    pub fn run(&mut self) -> Result<(), ServerError> {
        loop {
            match self.accept_one() {
                Ok(summary) => log_summary(&summary),
                Err(e @ ServerError::Accept(_)) => return Err(e),
                Err(e) if self.config.keep_listening => {
                    error!(error = %e, "Session failed");
                }
                Err(e) => return Err(e),
            }

            if !self.config.keep_listening {
                return Ok(());
            }
        }
    }

    /// Accept a single connection and serve it until it closes.
    pub fn accept_one(&mut self) -> Result<SessionSummary, ServerError> {
        self.state = ServerState::Listening;
        let (stream, addr) = self.listener.accept().map_err(ServerError::Accept)?;
        self.state = ServerState::Accepted;
        debug!(peer = %addr, "New connection");

        let peer = addr.to_string();
        let mut conn = Connection::from_tcp(stream)
            .and_then(|mut conn| {
                conn.set_receive_timeout(self.config.read_timeout)?;
                Ok(conn)
            })
            .map_err(|source| ServerError::Transport {
                peer: peer.clone(),
                frames: 0,
                source,
            })?
            .with_max_frame_len(self.config.max_frame_size);

        self.serve(&mut conn, &peer)
    }

    /// Run the `Serving` loop over an established connection.
    pub fn serve<S: Read + Write>(
        &mut self,
        conn: &mut Connection<S>,
        peer: &str,
    ) -> Result<SessionSummary, ServerError> {
        self.state = ServerState::Serving;
        let result = self.serve_frames(conn, peer);
        self.state = ServerState::Closed;
        result
    }

    fn serve_frames<S: Read + Write>(
        &self,
        conn: &mut Connection<S>,
        peer: &str,
    ) -> Result<SessionSummary, ServerError> {
        let start = Instant::now();
        let mut frames = 0u64;
        let mut bytes = 0u64;
        let mut malformed = 0u64;

        let transport_error = |frames, source| ServerError::Transport {
            peer: peer.to_string(),
            frames,
            source,
        };

        loop {
            if self.config.expected.is_some_and(|expected| frames >= expected) {
                info!(peer, frames, "Expected frame count reached");
                break;
            }

            let payload = match conn.receive() {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    debug!(peer, "Connection closed by client");
                    break;
                }
                Err(source) => return Err(transport_error(frames, source)),
            };
            frames += 1;
            bytes += payload.len() as u64;

            if let Some(codec) = &self.decoder {
                match codec.decode(&payload) {
                    Ok(record) => trace!(frame = frames, ?record, "Decoded frame"),
                    Err(e) => match self.config.on_decode_error {
                        DecodeErrorPolicy::Skip => {
                            malformed += 1;
                            warn!(peer, frame = frames, error = %e, "Skipping malformed frame");
                        }
                        DecodeErrorPolicy::Abort => {
                            return Err(ServerError::Decode {
                                peer: peer.to_string(),
                                frame: frames,
                                source: e,
                            })
                        }
                    },
                }
            }

            conn.send(ACK)
                .map_err(|source| transport_error(frames, source))?;

            if self.config.progress_interval > 0 && frames % self.config.progress_interval == 0 {
                info!(frames, "Received frames");
            }
        }

        Ok(SessionSummary {
            peer: peer.to_string(),
            frames,
            bytes,
            malformed,
            elapsed: start.elapsed(),
        })
    }
}

fn log_summary(summary: &SessionSummary) {
    info!(
        peer = %summary.peer,
        frames = summary.frames,
        bytes = summary.bytes,
        malformed = summary.malformed,
        elapsed_secs = summary.elapsed.as_secs_f64(),
        throughput = summary.throughput(),
        "Session closed"
    );
}

/// Create a blocking listener with `SO_REUSEADDR` so a restarted server can
/// rebind while the previous socket is in TIME_WAIT.
fn create_listener(listen: &str) -> io::Result<TcpListener> {
    let addr = listen.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
    })?;

    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(16)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench;
    use crate::codec::{BinaryCodec, CodecKind, JsonCodec};
    use crate::error::{DecodeError, TransportError};
    use crate::record::Record;
    use crate::transport::tests::Trickle;
    use crate::transport::{receive_frame, send_frame};
    use std::io::Cursor;
    use std::thread;

    fn test_config() -> ServerConfig {
        ServerConfig {
            listen: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        }
    }

    fn frames(payloads: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for payload in payloads {
            send_frame(&mut out, payload).unwrap();
        }
        out
    }

    fn count_acks(output: Vec<u8>) -> usize {
        let mut cursor = Cursor::new(output);
        let mut n = 0;
        while let Some(frame) = receive_frame(&mut cursor, u32::MAX).unwrap() {
            assert_eq!(&frame[..], ACK);
            n += 1;
        }
        n
    }

    #[test]
    fn test_bind_starts_listening() {
        let server = EchoServer::bind(test_config()).unwrap();
        assert_eq!(server.state(), ServerState::Listening);
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_bind_invalid_address() {
        let config = ServerConfig {
            listen: "not an address".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(
            EchoServer::bind(config),
            Err(ServerError::Bind { .. })
        ));
    }

    #[test]
    fn test_acks_every_frame() {
        let mut server = EchoServer::bind(test_config()).unwrap();
        let input = frames(&[b"one", b"", b"three"]);
        let mut conn = Connection::new(Trickle::new(input, 2));

        let summary = server.serve(&mut conn, "test").unwrap();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.bytes, 8);
        assert_eq!(summary.malformed, 0);
        assert_eq!(server.state(), ServerState::Closed);
        assert_eq!(count_acks(conn.into_inner().output), 3);
    }

    #[test]
    fn test_stops_at_expected() {
        let config = ServerConfig {
            expected: Some(2),
            ..test_config()
        };
        let mut server = EchoServer::bind(config).unwrap();
        let mut conn = Connection::new(Trickle::new(frames(&[b"a", b"b", b"c"]), 64));

        let summary = server.serve(&mut conn, "test").unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(count_acks(conn.into_inner().output), 2);
    }

    #[test]
    fn test_skips_malformed_when_decoding() {
        let config = ServerConfig {
            decode: Some(CodecKind::Json),
            ..test_config()
        };
        let mut server = EchoServer::bind(config).unwrap();
        let good = JsonCodec.encode(&Record::new("A", 1));
        let mut conn = Connection::new(Trickle::new(frames(&[&good[..], b"{oops", &good[..]]), 64));

        let summary = server.serve(&mut conn, "test").unwrap();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.malformed, 1);
        assert_eq!(count_acks(conn.into_inner().output), 3);
    }

    #[test]
    fn test_aborts_on_malformed_when_configured() {
        let config = ServerConfig {
            decode: Some(CodecKind::Binary),
            on_decode_error: DecodeErrorPolicy::Abort,
            ..test_config()
        };
        let mut server = EchoServer::bind(config).unwrap();
        let good = BinaryCodec.encode(&Record::new("A", 1));
        let mut conn = Connection::new(Trickle::new(frames(&[&good[..], b"\x0a\x09short"]), 64));

        match server.serve(&mut conn, "test") {
            Err(ServerError::Decode {
                frame: 2,
                source: DecodeError::Truncated { .. },
                ..
            }) => {}
            other => panic!("unexpected: {:?}", other.map(|s| s.frames)),
        }
        assert_eq!(server.state(), ServerState::Closed);
        assert_eq!(count_acks(conn.into_inner().output), 1);
    }

    #[test]
    fn test_mid_frame_close_is_error() {
        let mut server = EchoServer::bind(test_config()).unwrap();
        let mut input = frames(&[b"whole"]);
        input.extend_from_slice(&[0x00, 0x00, 0x01]);
        let mut conn = Connection::new(Trickle::new(input, 64));

        match server.serve(&mut conn, "test") {
            Err(ServerError::Transport {
                frames: 1,
                source: TransportError::Incomplete { .. },
                ..
            }) => {}
            other => panic!("unexpected: {:?}", other.map(|s| s.frames)),
        }
    }

    #[test]
    fn test_rejects_oversized_frame() {
        let mut server = EchoServer::bind(test_config()).unwrap();
        let input = frames(&[&[0u8; 32]]);
        let mut conn = Connection::new(Trickle::new(input, 64)).with_max_frame_len(16);

        match server.serve(&mut conn, "test") {
            Err(ServerError::Transport {
                frames: 0,
                source: TransportError::FrameTooLarge { len: 32, max: 16 },
                ..
            }) => {}
            other => panic!("unexpected: {:?}", other.map(|s| s.frames)),
        }
    }

    #[test]
    fn test_end_to_end_three_records() {
        let mut server = EchoServer::bind(test_config()).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = thread::spawn(move || server.accept_one());

        let records = vec![Record::new("A", 1), Record::new("B", 2), Record::new("C", 3)];
        let mut conn = Connection::connect(addr).unwrap();
        let result = bench::run(&mut conn, &JsonCodec, records, 3).unwrap();
        assert_eq!(result.message_count(), 3);
        assert_eq!(conn.frames_received(), 3);
        drop(conn);

        let summary = handle.join().unwrap().unwrap();
        assert_eq!(summary.frames, 3);
    }

    #[test]
    fn test_end_to_end_empty_payload() {
        let config = ServerConfig {
            decode: Some(CodecKind::Binary),
            on_decode_error: DecodeErrorPolicy::Abort,
            ..test_config()
        };
        let mut server = EchoServer::bind(config).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = thread::spawn(move || server.accept_one());

        let record = Record::default();
        assert!(BinaryCodec.encode(&record).is_empty());

        let mut conn = Connection::connect(addr).unwrap();
        let result = bench::run(&mut conn, &BinaryCodec, vec![record], 1).unwrap();
        assert_eq!(result.message_count(), 1);
        assert_eq!(result.bytes_sent(), 4);
        drop(conn);

        let summary = handle.join().unwrap().unwrap();
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.bytes, 0);
    }

    #[test]
    fn test_serves_sequential_connections() {
        let mut server = EchoServer::bind(test_config()).unwrap();
        let addr = server.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let first = server.accept_one().unwrap();
            let second = server.accept_one().unwrap();
            (first.frames, second.frames, server.state())
        });

        for n in [2u64, 4] {
            let mut conn = Connection::connect(addr).unwrap();
            let records = crate::generator::RecordGenerator::new(n, n);
            bench::run(&mut conn, &BinaryCodec, records, n).unwrap();
        }

        assert_eq!(handle.join().unwrap(), (2, 4, ServerState::Closed));
    }

    #[test]
    fn test_client_sees_close_after_expected() {
        let config = ServerConfig {
            expected: Some(2),
            ..test_config()
        };
        let mut server = EchoServer::bind(config).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = thread::spawn(move || server.accept_one());

        let mut conn = Connection::connect(addr).unwrap();
        let records = crate::generator::RecordGenerator::new(1, 5);
        let err = bench::run(&mut conn, &JsonCodec, records, 5).unwrap_err();
        assert_eq!(err.completed(), 2);

        assert_eq!(handle.join().unwrap().unwrap().frames, 2);
    }
}
