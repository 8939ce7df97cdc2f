//! Configuration module for wirebench.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::codec::CodecKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "wirebench")]
#[command(author = "wirebench authors")]
#[command(version = "0.1.0")]
#[command(about = "Framed TCP round-trip benchmark", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the echo server
    Serve(ServeArgs),
    /// Run the benchmark client
    Bench(BenchArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to bind to (e.g., 0.0.0.0:9000)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Close the session after this many frames
    #[arg(long)]
    pub expected: Option<u64>,

    /// Accept another connection after each session closes
    #[arg(long)]
    pub keep_listening: bool,

    /// Decode every payload with this codec
    #[arg(long, value_enum)]
    pub decode: Option<CodecKind>,

    /// What to do with a payload that fails to decode
    #[arg(long, value_enum)]
    pub on_decode_error: Option<DecodeErrorPolicy>,

    /// Largest accepted frame payload in bytes
    #[arg(long)]
    pub max_frame_size: Option<u32>,

    /// Receive deadline in milliseconds (0 = wait forever)
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Frames between progress log lines (0 = off)
    #[arg(long)]
    pub progress_interval: Option<u64>,
}

#[derive(Args, Debug, Default)]
pub struct BenchArgs {
    /// Server address (e.g., 127.0.0.1:9000)
    #[arg(short = 'a', long)]
    pub connect: Option<String>,

    /// Number of round trips
    #[arg(short = 'n', long)]
    pub count: Option<u64>,

    /// Record codec
    #[arg(long, value_enum)]
    pub codec: Option<CodecKind>,

    /// Seed for the record generator
    #[arg(long)]
    pub seed: Option<u64>,

    /// Receive deadline in milliseconds (0 = wait forever)
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Round trips between progress log lines (0 = off)
    #[arg(long)]
    pub progress_interval: Option<u64>,

    /// Print the result as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

/// Handling of payloads the server cannot decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DecodeErrorPolicy {
    /// Log, count and acknowledge the frame anyway
    #[default]
    Skip,
    /// Close the session
    Abort,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub bench: BenchSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub expected: Option<u64>,
    #[serde(default)]
    pub keep_listening: bool,
    pub decode: Option<CodecKind>,
    #[serde(default)]
    pub on_decode_error: DecodeErrorPolicy,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: u32,
    #[serde(default)]
    pub read_timeout_ms: u64,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            expected: None,
            keep_listening: false,
            decode: None,
            on_decode_error: DecodeErrorPolicy::default(),
            max_frame_size: default_max_frame_size(),
            read_timeout_ms: 0,
            progress_interval: default_progress_interval(),
        }
    }
}

/// Benchmark-client configuration
#[derive(Debug, Deserialize)]
pub struct BenchSection {
    #[serde(default = "default_connect")]
    pub connect: String,
    #[serde(default = "default_count")]
    pub count: u64,
    #[serde(default = "default_codec")]
    pub codec: CodecKind,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub read_timeout_ms: u64,
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

impl Default for BenchSection {
    fn default() -> Self {
        Self {
            connect: default_connect(),
            count: default_count(),
            codec: default_codec(),
            seed: 0,
            read_timeout_ms: 0,
            progress_interval: default_progress_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_connect() -> String {
    "127.0.0.1:9000".to_string()
}

fn default_max_frame_size() -> u32 {
    16 * 1024 * 1024 // 16 MB
}

fn default_count() -> u64 {
    10_000
}

fn default_codec() -> CodecKind {
    CodecKind::Json
}

fn default_progress_interval() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Resolved echo-server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub expected: Option<u64>,
    pub keep_listening: bool,
    pub decode: Option<CodecKind>,
    pub on_decode_error: DecodeErrorPolicy,
    pub max_frame_size: u32,
    pub read_timeout: Option<Duration>,
    pub progress_interval: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerSection::default().resolve(ServeArgs::default())
    }
}

impl ServerSection {
    fn resolve(self, cli: ServeArgs) -> ServerConfig {
        ServerConfig {
            listen: cli.listen.unwrap_or(self.listen),
            expected: cli.expected.or(self.expected),
            keep_listening: cli.keep_listening || self.keep_listening,
            decode: cli.decode.or(self.decode),
            on_decode_error: cli.on_decode_error.unwrap_or(self.on_decode_error),
            max_frame_size: cli.max_frame_size.unwrap_or(self.max_frame_size),
            read_timeout: timeout_from_ms(cli.read_timeout_ms.unwrap_or(self.read_timeout_ms)),
            progress_interval: cli.progress_interval.unwrap_or(self.progress_interval),
        }
    }
}

/// Resolved benchmark-client settings
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub connect: String,
    pub count: u64,
    pub codec: CodecKind,
    pub seed: u64,
    pub read_timeout: Option<Duration>,
    pub progress_interval: u64,
    pub json: bool,
}

impl BenchSection {
    fn resolve(self, cli: BenchArgs) -> BenchConfig {
        BenchConfig {
            connect: cli.connect.unwrap_or(self.connect),
            count: cli.count.unwrap_or(self.count),
            codec: cli.codec.unwrap_or(self.codec),
            seed: cli.seed.unwrap_or(self.seed),
            read_timeout: timeout_from_ms(cli.read_timeout_ms.unwrap_or(self.read_timeout_ms)),
            progress_interval: cli.progress_interval.unwrap_or(self.progress_interval),
            json: cli.json,
        }
    }
}

/// Which role this process runs.
#[derive(Debug, Clone)]
pub enum Mode {
    Serve(ServerConfig),
    Bench(BenchConfig),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub mode: Mode,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let mode = match cli.command {
            Command::Serve(args) => Mode::Serve(toml_config.server.resolve(args)),
            Command::Bench(args) => Mode::Bench(toml_config.bench.resolve(args)),
        };

        Ok(Config {
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
            mode,
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}
