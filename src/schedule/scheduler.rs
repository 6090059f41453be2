//! Polling scheduler

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::drift::DriftTracker;
use super::window::TimeWindow;
use crate::delivery::DeliveryResult;
use crate::exporter::Exporter;

/// How a cycle moves events from the source to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleMode {
    /// Collect the whole window, then deliver it
    Batch,
    /// Stream the window through the producer/consumer pipeline
    Streaming,
}

/// Summary of one polling cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub window: TimeWindow,
    pub collected: usize,
    pub skipped: usize,
    pub delivery: Option<DeliveryResult>,
    /// Set when the trace service could not be queried
    pub source_error: Option<String>,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn delivery_failed(&self) -> bool {
        self.delivery
            .as_ref()
            .map_or(false, |delivery| !delivery.is_complete())
    }
}

/// Runs single cycles: window, export, drift record
#[derive(Clone)]
pub struct CycleRunner {
    exporter: Arc<Exporter>,
    drift: Arc<DriftTracker>,
    lookback_minutes: u32,
}

impl CycleRunner {
    pub fn new(exporter: Arc<Exporter>, drift: Arc<DriftTracker>, lookback_minutes: u32) -> Self {
        Self {
            exporter,
            drift,
            lookback_minutes,
        }
    }

    pub fn drift(&self) -> &DriftTracker {
        &self.drift
    }

    /// Run one cycle; the drift is recorded whatever the outcome
    pub async fn run(&self, mode: CycleMode, done: CancellationToken) -> CycleReport {
        let started = Instant::now();
        let window = self.drift.window(chrono::Utc::now(), self.lookback_minutes);
        let tracker = self.exporter.querier().tracker();

        tracing::debug!(%tracker, from = %window.from, to = %window.to, ?mode, "Starting cycle");

        let mut report = CycleReport {
            window,
            collected: 0,
            skipped: 0,
            delivery: None,
            source_error: None,
            elapsed: Duration::ZERO,
        };

        match mode {
            CycleMode::Batch => match self.exporter.run_batch(window).await {
                Ok(batch) => {
                    report.collected = batch.collected;
                    report.skipped = batch.skipped;
                    report.delivery = batch.delivery;
                }
                Err(e) => {
                    tracing::error!(
                        %tracker,
                        from = %window.from,
                        to = %window.to,
                        error = %e,
                        "Querying cloud trace service failed"
                    );
                    report.source_error = Some(e.to_string());
                }
            },
            CycleMode::Streaming => {
                let stream = self.exporter.run_stream(window, done).await;
                report.collected = stream.received;
                report.skipped = stream.producer.skipped;
                report.source_error = stream.producer.error;
                if self.exporter.forwards() && stream.received > 0 {
                    report.delivery = Some(stream.delivery);
                }
            }
        }

        report.elapsed = self.drift.record_elapsed(started);
        tracing::debug!(%tracker, elapsed_ms = report.elapsed.as_millis() as u64, "Cycle finished");
        report
    }
}

/// Fires a cycle every `interval` until shut down.
///
/// Batch cycles run inline, so the next tick waits for them. Streaming
/// cycles are spawned and may overlap with later ones.
pub struct Scheduler {
    runner: CycleRunner,
    interval: Duration,
    mode: CycleMode,
}

impl Scheduler {
    pub fn new(runner: CycleRunner, interval: Duration, mode: CycleMode) -> Self {
        Self {
            runner,
            interval,
            mode,
        }
    }

    pub fn runner(&self) -> &CycleRunner {
        &self.runner
    }

    /// Loop until `shutdown` is cancelled, then wait for in-flight cycles
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => match self.mode {
                    CycleMode::Batch => {
                        self.runner.run(CycleMode::Batch, shutdown.child_token()).await;
                    }
                    CycleMode::Streaming => {
                        let runner = self.runner.clone();
                        let done = shutdown.child_token();
                        cycles.spawn(async move { runner.run(CycleMode::Streaming, done).await });
                    }
                },
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Streaming cycle task failed");
                    }
                }
            }
        }

        if !cycles.is_empty() {
            tracing::info!(in_flight = cycles.len(), "Waiting for in-flight cycles");
        }
        while let Some(joined) = cycles.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Streaming cycle task failed");
            }
        }
    }
}
