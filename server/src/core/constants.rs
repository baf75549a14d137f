// =============================================================================
// Application Identity
// =============================================================================

/// Application name for display
pub const APP_NAME: &str = "Interop Coordinator";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".interop";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "interop.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "INTEROP_CONFIG";

// =============================================================================
// Environment Variables - Logging / Debug
// =============================================================================

/// Environment variable for debug mode
pub const ENV_DEBUG: &str = "INTEROP_DEBUG";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "INTEROP_LOG";

/// Environment variable to switch logs to JSON lines
pub const ENV_LOG_JSON: &str = "INTEROP_LOG_JSON";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for API server host
pub const ENV_HOST: &str = "INTEROP_HOST";

/// Environment variable for API server port
pub const ENV_PORT: &str = "INTEROP_PORT";

/// Environment variable to enable/disable the OTLP gRPC receiver
pub const ENV_RECEIVER_ENABLED: &str = "INTEROP_RECEIVER_ENABLED";

/// Environment variable for the OTLP gRPC receiver port
pub const ENV_RECEIVER_PORT: &str = "INTEROP_RECEIVER_PORT";

// =============================================================================
// Environment Variables - Store
// =============================================================================

/// Span expiry window in milliseconds
pub const ENV_STORE_EXPIRY_MS: &str = "INTEROP_STORE_EXPIRY_MS";

/// Expiry window after a root span arrives, in milliseconds
pub const ENV_STORE_ROOT_EXPIRY_MS: &str = "INTEROP_STORE_ROOT_EXPIRY_MS";

/// Flush loop tick in milliseconds
pub const ENV_STORE_TICK_MS: &str = "INTEROP_STORE_TICK_MS";

/// Flush sink channel capacity
pub const ENV_STORE_SINK_CAPACITY: &str = "INTEROP_STORE_SINK_CAPACITY";

// =============================================================================
// Environment Variables - Coordinator
// =============================================================================

/// Seconds to wait for expected spans after a test run
pub const ENV_SPAN_WAIT_SECS: &str = "INTEROP_SPAN_WAIT_SECS";

/// Timeout for test requests sent to services, in seconds
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "INTEROP_REQUEST_TIMEOUT_SECS";

/// Slow root span threshold in milliseconds
pub const ENV_SLOW_TRACE_MS: &str = "INTEROP_SLOW_TRACE_MS";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default API server port
pub const DEFAULT_PORT: u16 = 10003;

/// Default OTLP gRPC receiver port
pub const DEFAULT_RECEIVER_PORT: u16 = 10001;

/// Max OTLP gRPC message size (16 MiB)
pub const OTLP_GRPC_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Max JSON body size for API requests (1 MiB)
pub const API_MAX_BODY_BYTES: usize = 1024 * 1024;

// =============================================================================
// Store Defaults
// =============================================================================

/// Spans for a trace are buffered this long after the latest arrival
pub const DEFAULT_STORE_EXPIRY_MS: u64 = 10_000;

/// Shortened window once the root span is seen
pub const DEFAULT_STORE_ROOT_EXPIRY_MS: u64 = 100;

/// Flush loop tick
pub const DEFAULT_STORE_TICK_MS: u64 = 1_000;

/// Flush sink channel capacity
pub const DEFAULT_STORE_SINK_CAPACITY: usize = 1024;

/// How long a flush waits on a full sink before dropping the trace
pub const DEFAULT_STORE_SINK_SEND_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// Coordinator Defaults
// =============================================================================

/// Wait for expected spans after executing test cases
pub const DEFAULT_SPAN_WAIT_SECS: u64 = 30;

/// Per-request timeout when contacting a service under test
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Completed run results kept in memory
pub const DEFAULT_MAX_RESULTS: usize = 100;

/// Root spans longer than this are flagged as slow
pub const DEFAULT_SLOW_TRACE_MS: u64 = 500;

/// Path the executor posts test requests to on the first hop
pub const TEST_REQUEST_PATH: &str = "/test";

// =============================================================================
// Shutdown
// =============================================================================

/// Maximum time to wait for background tasks on shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
