use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_HOST, DEFAULT_MAX_RESULTS, DEFAULT_PORT,
    DEFAULT_RECEIVER_PORT, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SLOW_TRACE_MS,
    DEFAULT_SPAN_WAIT_SECS, DEFAULT_STORE_EXPIRY_MS, DEFAULT_STORE_ROOT_EXPIRY_MS,
    DEFAULT_STORE_SINK_CAPACITY, DEFAULT_STORE_SINK_SEND_TIMEOUT_MS, DEFAULT_STORE_TICK_MS,
};

// =============================================================================
// File Config Structs (JSON deserialization)
// =============================================================================

/// API server configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// OTLP gRPC receiver configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ReceiverFileConfig {
    pub enabled: Option<bool>,
    pub port: Option<u16>,
}

/// Trace store configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StoreFileConfig {
    pub expiry_ms: Option<u64>,
    pub root_expiry_ms: Option<u64>,
    pub tick_ms: Option<u64>,
    pub sink_capacity: Option<usize>,
    pub sink_send_timeout_ms: Option<u64>,
}

/// Test coordinator configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CoordinatorFileConfig {
    pub span_wait_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub max_results: Option<usize>,
}

/// Trace analysis configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AnalysisFileConfig {
    pub slow_trace_ms: Option<u64>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<ServerFileConfig>,
    pub receiver: Option<ReceiverFileConfig>,
    pub store: Option<StoreFileConfig>,
    pub coordinator: Option<CoordinatorFileConfig>,
    pub analysis: Option<AnalysisFileConfig>,
    pub debug: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        if let Some(server) = other.server {
            let current = self.server.get_or_insert_with(ServerFileConfig::default);
            if server.host.is_some() {
                tracing::trace!(host = ?server.host, "Merging server.host");
                current.host = server.host;
            }
            if server.port.is_some() {
                tracing::trace!(port = ?server.port, "Merging server.port");
                current.port = server.port;
            }
        }

        if let Some(receiver) = other.receiver {
            let current = self
                .receiver
                .get_or_insert_with(ReceiverFileConfig::default);
            if receiver.enabled.is_some() {
                tracing::trace!(enabled = ?receiver.enabled, "Merging receiver.enabled");
                current.enabled = receiver.enabled;
            }
            if receiver.port.is_some() {
                tracing::trace!(port = ?receiver.port, "Merging receiver.port");
                current.port = receiver.port;
            }
        }

        if let Some(store) = other.store {
            let current = self.store.get_or_insert_with(StoreFileConfig::default);
            if store.expiry_ms.is_some() {
                tracing::trace!(expiry_ms = ?store.expiry_ms, "Merging store.expiry_ms");
                current.expiry_ms = store.expiry_ms;
            }
            if store.root_expiry_ms.is_some() {
                tracing::trace!(root_expiry_ms = ?store.root_expiry_ms, "Merging store.root_expiry_ms");
                current.root_expiry_ms = store.root_expiry_ms;
            }
            if store.tick_ms.is_some() {
                tracing::trace!(tick_ms = ?store.tick_ms, "Merging store.tick_ms");
                current.tick_ms = store.tick_ms;
            }
            if store.sink_capacity.is_some() {
                tracing::trace!(sink_capacity = ?store.sink_capacity, "Merging store.sink_capacity");
                current.sink_capacity = store.sink_capacity;
            }
            if store.sink_send_timeout_ms.is_some() {
                tracing::trace!(
                    sink_send_timeout_ms = ?store.sink_send_timeout_ms,
                    "Merging store.sink_send_timeout_ms"
                );
                current.sink_send_timeout_ms = store.sink_send_timeout_ms;
            }
        }

        if let Some(coordinator) = other.coordinator {
            let current = self
                .coordinator
                .get_or_insert_with(CoordinatorFileConfig::default);
            if coordinator.span_wait_secs.is_some() {
                tracing::trace!(
                    span_wait_secs = ?coordinator.span_wait_secs,
                    "Merging coordinator.span_wait_secs"
                );
                current.span_wait_secs = coordinator.span_wait_secs;
            }
            if coordinator.request_timeout_secs.is_some() {
                tracing::trace!(
                    request_timeout_secs = ?coordinator.request_timeout_secs,
                    "Merging coordinator.request_timeout_secs"
                );
                current.request_timeout_secs = coordinator.request_timeout_secs;
            }
            if coordinator.max_results.is_some() {
                tracing::trace!(max_results = ?coordinator.max_results, "Merging coordinator.max_results");
                current.max_results = coordinator.max_results;
            }
        }

        if let Some(analysis) = other.analysis {
            let current = self
                .analysis
                .get_or_insert_with(AnalysisFileConfig::default);
            if analysis.slow_trace_ms.is_some() {
                tracing::trace!(slow_trace_ms = ?analysis.slow_trace_ms, "Merging analysis.slow_trace_ms");
                current.slow_trace_ms = analysis.slow_trace_ms;
            }
        }

        if other.debug.is_some() {
            tracing::trace!(debug = ?other.debug, "Merging debug");
            self.debug = other.debug;
        }
    }
}

// =============================================================================
// Runtime Config Structs (final merged configuration)
// =============================================================================

/// API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// OTLP gRPC receiver configuration
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Trace store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub expiry_ms: u64,
    pub root_expiry_ms: u64,
    pub tick_ms: u64,
    pub sink_capacity: usize,
    pub sink_send_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            expiry_ms: DEFAULT_STORE_EXPIRY_MS,
            root_expiry_ms: DEFAULT_STORE_ROOT_EXPIRY_MS,
            tick_ms: DEFAULT_STORE_TICK_MS,
            sink_capacity: DEFAULT_STORE_SINK_CAPACITY,
            sink_send_timeout_ms: DEFAULT_STORE_SINK_SEND_TIMEOUT_MS,
        }
    }
}

/// Test coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub span_wait_secs: u64,
    pub request_timeout_secs: u64,
    pub max_results: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            span_wait_secs: DEFAULT_SPAN_WAIT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

/// Trace analysis configuration
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub slow_trace_ms: u64,
}

/// Final merged application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub receiver: ReceiverConfig,
    pub store: StoreConfig,
    pub coordinator: CoordinatorConfig,
    pub analysis: AnalysisConfig,
    pub debug: bool,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.interop/interop.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        // 1. Load from profile dir - skip if not exists
        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        // 2. Load from CLI-specified path OR local directory
        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let config = Self::from_layers(cli, file_config);
        config.validate()?;

        tracing::debug!(
            host = %config.server.host,
            port = config.server.port,
            receiver_enabled = config.receiver.enabled,
            receiver_port = config.receiver.port,
            store_expiry_ms = config.store.expiry_ms,
            store_root_expiry_ms = config.store.root_expiry_ms,
            store_tick_ms = config.store.tick_ms,
            store_sink_capacity = config.store.sink_capacity,
            span_wait_secs = config.coordinator.span_wait_secs,
            request_timeout_secs = config.coordinator.request_timeout_secs,
            max_results = config.coordinator.max_results,
            slow_trace_ms = config.analysis.slow_trace_ms,
            debug = config.debug,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Layer defaults, merged file config and CLI/env overrides
    pub(crate) fn from_layers(cli: &CliConfig, file_config: FileConfig) -> Self {
        let file_server = file_config.server.unwrap_or_default();
        let file_receiver = file_config.receiver.unwrap_or_default();
        let file_store = file_config.store.unwrap_or_default();
        let file_coordinator = file_config.coordinator.unwrap_or_default();
        let file_analysis = file_config.analysis.unwrap_or_default();

        let host = cli
            .host
            .clone()
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT);

        let receiver = ReceiverConfig {
            enabled: cli.receiver.or(file_receiver.enabled).unwrap_or(true),
            port: cli
                .receiver_port
                .or(file_receiver.port)
                .unwrap_or(DEFAULT_RECEIVER_PORT),
        };

        let store = StoreConfig {
            expiry_ms: cli
                .store_expiry_ms
                .or(file_store.expiry_ms)
                .unwrap_or(DEFAULT_STORE_EXPIRY_MS),
            root_expiry_ms: cli
                .store_root_expiry_ms
                .or(file_store.root_expiry_ms)
                .unwrap_or(DEFAULT_STORE_ROOT_EXPIRY_MS),
            tick_ms: cli
                .store_tick_ms
                .or(file_store.tick_ms)
                .unwrap_or(DEFAULT_STORE_TICK_MS),
            sink_capacity: cli
                .store_sink_capacity
                .or(file_store.sink_capacity)
                .unwrap_or(DEFAULT_STORE_SINK_CAPACITY),
            // file-only setting
            sink_send_timeout_ms: file_store
                .sink_send_timeout_ms
                .unwrap_or(DEFAULT_STORE_SINK_SEND_TIMEOUT_MS),
        };

        let coordinator = CoordinatorConfig {
            span_wait_secs: cli
                .span_wait_secs
                .or(file_coordinator.span_wait_secs)
                .unwrap_or(DEFAULT_SPAN_WAIT_SECS),
            request_timeout_secs: cli
                .request_timeout_secs
                .or(file_coordinator.request_timeout_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_results: file_coordinator
                .max_results
                .unwrap_or(DEFAULT_MAX_RESULTS),
        };

        let analysis = AnalysisConfig {
            slow_trace_ms: cli
                .slow_trace_ms
                .or(file_analysis.slow_trace_ms)
                .unwrap_or(DEFAULT_SLOW_TRACE_MS),
        };

        // debug: CLI/env flag takes precedence, then file config, default false
        let debug = cli.debug || file_config.debug.unwrap_or(false);

        Self {
            server: ServerConfig { host, port },
            receiver,
            store,
            coordinator,
            analysis,
            debug,
        }
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("Configuration error: server.host must not be empty");
        }
        if self.server.port == 0 {
            anyhow::bail!("Configuration error: server.port must be greater than 0");
        }
        if self.receiver.enabled && self.receiver.port == 0 {
            anyhow::bail!("Configuration error: receiver.port must be greater than 0");
        }
        if self.receiver.enabled && self.server.port == self.receiver.port {
            anyhow::bail!(
                "Configuration error: server.port and receiver.port cannot be the same ({})",
                self.server.port
            );
        }

        if self.store.tick_ms == 0 {
            anyhow::bail!("Configuration error: store.tick_ms must be greater than 0");
        }
        if self.store.sink_capacity == 0 {
            anyhow::bail!("Configuration error: store.sink_capacity must be greater than 0");
        }
        if self.store.expiry_ms == 0 {
            anyhow::bail!("Configuration error: store.expiry_ms must be greater than 0");
        }
        if self.store.root_expiry_ms >= self.store.expiry_ms {
            tracing::warn!(
                root_expiry_ms = self.store.root_expiry_ms,
                expiry_ms = self.store.expiry_ms,
                "store.root_expiry_ms is not shorter than store.expiry_ms, root spans will not speed up flushing"
            );
        }

        if self.coordinator.max_results == 0 {
            anyhow::bail!("Configuration error: coordinator.max_results must be greater than 0");
        }

        Ok(())
    }
}

/// Get the profile config path (~/.interop/interop.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}
