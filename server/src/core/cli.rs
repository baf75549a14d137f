use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::constants::{
    ENV_CONFIG, ENV_DEBUG, ENV_HOST, ENV_LOG_JSON, ENV_PORT, ENV_RECEIVER_ENABLED,
    ENV_RECEIVER_PORT, ENV_REQUEST_TIMEOUT_SECS, ENV_SLOW_TRACE_MS, ENV_SPAN_WAIT_SECS,
    ENV_STORE_EXPIRY_MS, ENV_STORE_ROOT_EXPIRY_MS, ENV_STORE_SINK_CAPACITY, ENV_STORE_TICK_MS,
};

#[derive(Parser)]
#[command(name = "interop-coordinator")]
#[command(version, about = "Distributed tracing interop test coordinator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// API server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// API server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Enable debug mode (verbose logging of received spans)
    #[arg(long, global = true, env = ENV_DEBUG)]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = ENV_LOG_JSON)]
    pub log_json: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Enable the OTLP gRPC span receiver
    #[arg(long, global = true, env = ENV_RECEIVER_ENABLED)]
    pub receiver: Option<bool>,

    /// OTLP gRPC span receiver port
    #[arg(long, global = true, env = ENV_RECEIVER_PORT)]
    pub receiver_port: Option<u16>,

    /// Trace expiry window (e.g. 10s, 1500ms)
    #[arg(long, global = true, env = ENV_STORE_EXPIRY_MS, value_parser = parse_duration_ms)]
    pub store_expiry: Option<u64>,

    /// Trace expiry window after the root span arrives (e.g. 100ms)
    #[arg(long, global = true, env = ENV_STORE_ROOT_EXPIRY_MS, value_parser = parse_duration_ms)]
    pub store_root_expiry: Option<u64>,

    /// Flush loop tick (e.g. 1s)
    #[arg(long, global = true, env = ENV_STORE_TICK_MS, value_parser = parse_duration_ms)]
    pub store_tick: Option<u64>,

    /// Flush sink capacity (traces)
    #[arg(long, global = true, env = ENV_STORE_SINK_CAPACITY)]
    pub store_sink_capacity: Option<usize>,

    /// Seconds to wait for spans after a test run
    #[arg(long, global = true, env = ENV_SPAN_WAIT_SECS)]
    pub span_wait_secs: Option<u64>,

    /// Timeout in seconds for test requests sent to services
    #[arg(long, global = true, env = ENV_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: Option<u64>,

    /// Root spans slower than this are flagged (e.g. 500ms)
    #[arg(long, global = true, env = ENV_SLOW_TRACE_MS, value_parser = parse_duration_ms)]
    pub slow_trace: Option<u64>,
}

/// Parse a duration in milliseconds. Accepts `ms`, `s` and `m` suffixes; a
/// bare number is taken as milliseconds.
fn parse_duration_ms(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, multiplier) = if let Some(v) = s.strip_suffix("ms") {
        (v, 1)
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1_000)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60_000)
    } else {
        (s, 1)
    };
    digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| {
            format!(
                "Invalid duration '{}'. Examples: 250ms, 10s, 1m, 1500",
                s
            )
        })
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the coordinator (default command)
    Start,
    /// Reconstruct traces from an OTLP JSON export file and report the result
    Verify {
        /// Path to an ExportTraceServiceRequest in OTLP/JSON
        file: PathBuf,
    },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub debug: bool,
    pub log_json: bool,
    pub config: Option<PathBuf>,
    pub receiver: Option<bool>,
    pub receiver_port: Option<u16>,
    pub store_expiry_ms: Option<u64>,
    pub store_root_expiry_ms: Option<u64>,
    pub store_tick_ms: Option<u64>,
    pub store_sink_capacity: Option<usize>,
    pub span_wait_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub slow_trace_ms: Option<u64>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        debug: cli.debug,
        log_json: cli.log_json,
        config: cli.config,
        receiver: cli.receiver,
        receiver_port: cli.receiver_port,
        store_expiry_ms: cli.store_expiry,
        store_root_expiry_ms: cli.store_root_expiry,
        store_tick_ms: cli.store_tick,
        store_sink_capacity: cli.store_sink_capacity,
        span_wait_secs: cli.span_wait_secs,
        request_timeout_secs: cli.request_timeout_secs,
        slow_trace_ms: cli.slow_trace,
    };
    (config, cli.command)
}
