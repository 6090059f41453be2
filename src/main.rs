//! CTS Exporter
//!
//! Run with: cargo run -- [--from <minutes>] [--once]
//!
//! Configuration is read from the environment, see [`cts_exporter::config`].
//! RUST_LOG overrides the log filter derived from OS_DEBUG.

use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use cts_exporter::config::ExporterConfig;
use cts_exporter::logging::init_logging;
use cts_exporter::{
    CycleRunner, DriftTracker, EventTransformer, Exporter, HttpSink, HttpTraceSource, Scheduler,
    TraceQuerier,
};

const EXIT_CONFIG: i32 = 78;
const EXIT_SOFTWARE: i32 = 70;
const EXIT_DELIVERY: i32 = 3;

const SOURCE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "cts-exporter", version, about = "Export cloud trace audit records as CloudEvents")]
struct Cli {
    /// Look-back period in minutes; also the polling interval
    #[arg(long = "from", value_name = "MINUTES")]
    from: Option<u32>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = ExporterConfig::from_env().and_then(|config| match cli.from {
        Some(minutes) => config.with_lookback(minutes),
        None => Ok(config),
    });
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            init_logging(false);
            tracing::error!(error = %e, "Invalid configuration");
            exit(EXIT_CONFIG);
        }
    };

    init_logging(config.debug);

    let source = match HttpTraceSource::new(
        &config.source.endpoint,
        &config.source.project_id,
        config.source.auth_token.clone(),
        SOURCE_TIMEOUT,
    ) {
        Ok(source) => source,
        Err(e) => {
            tracing::error!(error = %e, "Creating cloud trace client failed");
            exit(EXIT_SOFTWARE);
        }
    };

    let sink = match HttpSink::new(config.sink.url.clone(), config.sink.timeout) {
        Ok(sink) => sink,
        Err(e) => {
            tracing::error!(error = %e, "Creating sink client failed");
            exit(EXIT_SOFTWARE);
        }
    };

    let querier = TraceQuerier::new(
        Arc::new(source),
        &config.source.tracker,
        config.source.page_size,
    );
    let transformer = EventTransformer::new(
        querier.endpoint(),
        config.source.identity(),
        config.sink.overrides.clone(),
    );
    let exporter = Arc::new(Exporter::new(
        querier,
        transformer,
        Arc::new(sink),
        config.forward,
    ));
    let runner = CycleRunner::new(
        exporter.clone(),
        Arc::new(DriftTracker::new()),
        config.lookback_minutes,
    );

    tracing::info!("CTS exporter {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  Domain: {}", config.source.domain_id);
    tracing::info!("  Region: {}", config.source.region);
    tracing::info!("  Project: {}", config.source.project_id);
    tracing::info!("  Tracker: {}", exporter.querier().tracker());
    tracing::info!("  Endpoint: {}", exporter.querier().endpoint());
    tracing::info!(
        "  Look-back: {} minutes (interval {}s)",
        config.lookback_minutes,
        config.interval().as_secs()
    );
    tracing::info!("  Page size: {}", exporter.querier().page_size());
    tracing::info!("  Mode: {:?}", config.mode());
    tracing::info!("  Sink: {}", exporter.sink_target());
    if !config.forward {
        tracing::info!("  Forwarding: DISABLED (events are pulled and logged only)");
    }

    if cli.once {
        let report = runner.run(config.mode(), CancellationToken::new()).await;
        tracing::info!(
            collected = report.collected,
            skipped = report.skipped,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Single cycle finished"
        );
        if report.delivery_failed() {
            exit(EXIT_DELIVERY);
        }
        return;
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
        }
        signal.cancel();
    });

    Scheduler::new(runner, config.interval(), config.mode())
        .run(shutdown)
        .await;

    tracing::info!("CTS exporter stopped");
}
