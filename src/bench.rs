//! Round-trip benchmark driver.
//!
//! Sends one encoded record per frame and waits for the server's ACK frame
//! before sending the next. Requests are never pipelined, so every latency
//! sample is one full round trip.

use crate::codec::Codec;
use crate::error::BenchError;
use crate::record::Record;
use crate::transport::{Connection, LENGTH_PREFIX_LEN};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Default number of round trips between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

/// Run `count` round trips with default settings.
pub fn run<S, I>(
    conn: &mut Connection<S>,
    codec: &dyn Codec,
    records: I,
    count: u64,
) -> Result<BenchmarkResult, BenchError>
where
    S: Read + Write,
    I: IntoIterator<Item = Record>,
{
    Driver::new(codec).run(conn, records, count)
}

/// Benchmark driver bound to one codec.
pub struct Driver<'a> {
    codec: &'a dyn Codec,
    progress_interval: u64,
}

impl<'a> Driver<'a> {
    pub fn new(codec: &'a dyn Codec) -> Self {
        Self {
            codec,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Log progress every `interval` round trips; 0 disables it.
    pub fn progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Drive `count` request/ACK round trips over `conn`.
    ///
    /// Aborts on the first failure without retrying; the error carries the
    /// number of round trips that completed.
    pub fn run<S, I>(
        &self,
        conn: &mut Connection<S>,
        records: I,
        count: u64,
    ) -> Result<BenchmarkResult, BenchError>
    where
        S: Read + Write,
        I: IntoIterator<Item = Record>,
    {
        let mut records = records.into_iter();
        let mut latencies = Vec::with_capacity(usize::try_from(count).unwrap_or(0).min(1 << 20));
        let mut bytes_sent = 0u64;

        debug!(count, codec = self.codec.name(), "Starting benchmark run");

        let started_at = Utc::now();
        let start = Instant::now();

        for completed in 0..count {
            let record = records
                .next()
                .ok_or(BenchError::RecordsExhausted { completed })?;
            let payload = self.codec.encode(&record);

            let sent_at = Instant::now();
            conn.send(&payload)
                .map_err(|source| BenchError::Transport { completed, source })?;

            match conn.receive() {
                Ok(Some(ack)) => trace!(len = ack.len(), "ACK received"),
                Ok(None) => return Err(BenchError::ConnectionClosed { completed }),
                Err(source) => return Err(BenchError::Transport { completed, source }),
            }
            latencies.push(sent_at.elapsed());
            bytes_sent += (LENGTH_PREFIX_LEN + payload.len()) as u64;

            let done = completed + 1;
            if self.progress_interval > 0 && done % self.progress_interval == 0 {
                info!(completed = done, "Round trips completed");
            }
        }

        let elapsed = start.elapsed();

        Ok(BenchmarkResult {
            codec: self.codec.name(),
            started_at,
            message_count: count,
            elapsed,
            throughput: per_second(count, elapsed),
            bytes_sent,
            latency: LatencySummary::from_samples(&mut latencies),
        })
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if count == 0 || secs <= 0.0 {
        0.0
    } else {
        count as f64 / secs
    }
}

/// Outcome of a completed run. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkResult {
    codec: &'static str,
    started_at: DateTime<Utc>,
    message_count: u64,
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs")]
    elapsed: Duration,
    #[serde(rename = "throughput_msgs_per_sec")]
    throughput: f64,
    bytes_sent: u64,
    latency: LatencySummary,
}

impl BenchmarkResult {
    pub fn codec(&self) -> &'static str {
        self.codec
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Number of acknowledged round trips.
    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Wall-clock time from the first send to the last ACK.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Messages per second.
    pub fn throughput(&self) -> f64 {
        self.throughput
    }

    /// Bytes written including length prefixes.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn latency(&self) -> &LatencySummary {
        &self.latency
    }
}

impl fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} benchmark: sent {} messages", self.codec, self.message_count)?;
        writeln!(f, "Total time: {:.3} seconds", self.elapsed.as_secs_f64())?;
        writeln!(f, "Throughput: {:.2} messages/sec", self.throughput)?;
        write!(
            f,
            "Latency (us): min {:.1} / p50 {:.1} / p90 {:.1} / p99 {:.1} / max {:.1} / mean {:.1}",
            self.latency.min_us,
            self.latency.p50_us,
            self.latency.p90_us,
            self.latency.p99_us,
            self.latency.max_us,
            self.latency.mean_us
        )
    }
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Round-trip latency distribution in microseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub min_us: f64,
    pub mean_us: f64,
    pub p50_us: f64,
    pub p90_us: f64,
    pub p99_us: f64,
    pub max_us: f64,
}

impl LatencySummary {
    /// Summarize samples using nearest-rank percentiles. Sorts in place.
    pub fn from_samples(samples: &mut [Duration]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();

        let micros = |d: Duration| d.as_nanos() as f64 / 1_000.0;
        let total: Duration = samples.iter().sum();

        Self {
            min_us: micros(samples[0]),
            mean_us: micros(total) / samples.len() as f64,
            p50_us: micros(percentile(samples, 50)),
            p90_us: micros(percentile(samples, 90)),
            p99_us: micros(percentile(samples, 99)),
            max_us: micros(samples[samples.len() - 1]),
        }
    }
}

/// Nearest-rank percentile of sorted, non-empty samples.
fn percentile(sorted: &[Duration], pct: usize) -> Duration {
    let rank = (pct * sorted.len()).div_ceil(100);
    sorted[rank.clamp(1, sorted.len()) - 1]
}
