//! Core application

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use tokio::sync::mpsc;

use crate::api::{ApiServer, OtlpGrpcServer};
use crate::core::banner;
use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::ENV_LOG;
use crate::core::shutdown::ShutdownService;
use crate::data::{SpanCollector, TraceStore};
use crate::domain::interop::{
    HttpTestExecutor, InteropService, ServiceRegistry, Status, verify_traces,
};
use crate::domain::{Span, TracePipeline};
use crate::utils::file::read_json;

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub store: Arc<TraceStore>,
    pub collector: Arc<SpanCollector>,
    pub interop: Arc<InteropService>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();

        let (cli_config, command) = cli::parse();
        Self::init_logging(cli_config.debug, cli_config.log_json);

        tracing::debug!("Application starting");
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::Verify { file }) => return Self::verify_file(&file),
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config)?;
        Self::start_server(app).await
    }

    fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;

        let store = Arc::new(TraceStore::new(&config.store));
        let collector = Arc::new(SpanCollector::new());
        let executor = HttpTestExecutor::new(Duration::from_secs(
            config.coordinator.request_timeout_secs,
        ))
        .context("Failed to build test request client")?;
        let interop = Arc::new(InteropService::new(
            Arc::new(ServiceRegistry::new()),
            Arc::clone(&collector),
            Arc::new(executor),
            &config.coordinator,
        ));

        Ok(Self {
            shutdown: ShutdownService::new(),
            config,
            store,
            collector,
            interop,
        })
    }

    /// Reconstruct every trace in an OTLP/JSON export and print the verdicts
    fn verify_file(path: &Path) -> Result<()> {
        let request: ExportTraceServiceRequest = read_json(path)?;

        let mut spans = Vec::new();
        let mut rejected = 0usize;
        for otlp_span in request
            .resource_spans
            .iter()
            .flat_map(|rs| &rs.scope_spans)
            .flat_map(|ss| &ss.spans)
        {
            match Span::from_otlp(otlp_span) {
                Ok(span) => spans.push(span),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping invalid span");
                    rejected += 1;
                }
            }
        }

        let verdicts = verify_traces(&spans);
        let failed = verdicts
            .iter()
            .filter(|v| v.status == Status::Failure)
            .count();

        let report = serde_json::json!({
            "spans": spans.len(),
            "rejected_spans": rejected,
            "traces": &verdicts,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);

        if failed > 0 || rejected > 0 {
            anyhow::bail!(
                "{} of {} traces failed verification, {} spans rejected",
                failed,
                verdicts.len(),
                rejected
            );
        }
        Ok(())
    }

    fn init_logging(debug: bool, json: bool) {
        let crate_level = if debug { "debug" } else { "info" };
        let default_filter = format!("info,{}={}", env!("CARGO_CRATE_NAME"), crate_level);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        let builder = tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_env_filter(filter);

        if json {
            builder.json().init();
        } else {
            builder.with_ansi(true).compact().init();
        }
    }

    async fn start_server(app: Self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        app.shutdown.install_signal_handlers();

        app.start_background_tasks().await;

        if app.config.receiver.enabled {
            let grpc_server = OtlpGrpcServer::new(
                &app.config.server.host,
                app.config.receiver.port,
                Arc::clone(&app.store),
            )?;
            let shutdown_rx = app.shutdown.subscribe();
            let handle = tokio::spawn(async move {
                if let Err(e) = grpc_server.start(shutdown_rx).await {
                    tracing::error!(error = %e, "OTLP gRPC receiver error");
                }
            });

            app.shutdown.register(handle).await;
        } else {
            tracing::debug!("OTLP gRPC receiver disabled by config");
        }

        banner::print_banner(&app.config);

        let server = ApiServer::new(
            &app.config.server,
            Arc::clone(&app.interop),
            Arc::clone(&app.store),
            app.shutdown.clone(),
        )?;
        let result = server.start().await;
        if let Err(ref e) = result {
            tracing::error!(error = %e, "HTTP API server error");
        }
        app.shutdown.shutdown().await;

        result
    }

    /// Start the store flush loop and the pipeline that feeds the collector
    pub async fn start_background_tasks(&self) {
        let (sink_tx, sink_rx) = mpsc::channel(self.config.store.sink_capacity);

        let pipeline = TracePipeline::new(
            Arc::clone(&self.collector),
            Duration::from_millis(self.config.analysis.slow_trace_ms),
        );
        self.shutdown
            .register(pipeline.start(sink_rx, self.shutdown.subscribe()))
            .await;

        self.shutdown
            .register(self.store.start(sink_tx, self.shutdown.subscribe()))
            .await;

        tracing::debug!("Background tasks started");
    }
}
