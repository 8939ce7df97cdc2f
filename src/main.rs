//! wirebench: a framed TCP round-trip benchmark
//!
//! - `wirebench serve`: echo server acknowledging every frame
//! - `wirebench bench`: client driving N request/ACK round trips
//!
//! Configuration via CLI arguments or TOML file.

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wirebench::config::{BenchConfig, Config, Mode, ServerConfig};
use wirebench::{Connection, Driver, EchoServer, RecordGenerator};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match config.mode {
        Mode::Serve(server) => run_server(server),
        Mode::Bench(bench) => run_bench(bench),
    }
}

/// Run the echo server until its connection closes (or forever with keep_listening)
fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = EchoServer::bind(config)?;
    server.run()?;
    Ok(())
}

/// Connect, run the benchmark and print the result
fn run_bench(config: BenchConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        server = %config.connect,
        count = config.count,
        codec = ?config.codec,
        seed = config.seed,
        "Starting benchmark"
    );

    let mut conn = Connection::connect(&config.connect)?;
    conn.set_receive_timeout(config.read_timeout)?;

    let codec = config.codec.codec();
    let records = RecordGenerator::new(config.seed, config.count);
    let driver = Driver::new(codec.as_ref()).progress_interval(config.progress_interval);

    let result = match driver.run(&mut conn, records, config.count) {
        Ok(result) => result,
        Err(e) => {
            error!(completed = e.completed(), error = %e, "Benchmark aborted");
            return Err(e.into());
        }
    };

    info!(
        messages = result.message_count(),
        elapsed_secs = result.elapsed().as_secs_f64(),
        throughput = result.throughput(),
        p99_us = result.latency().p99_us,
        "Benchmark complete"
    );

    if config.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{result}");
    }

    Ok(())
}
