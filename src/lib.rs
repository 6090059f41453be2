//! CTS Exporter: cloud trace audit records as CloudEvents
//!
//! Periodically queries the cloud trace service for the audit records of a
//! tracker, maps every record to a CloudEvents envelope and delivers the
//! envelopes to an HTTP sink.
//!
//! # Components
//!
//! - **Source**: paginated trace queries over a time window
//! - **Events**: record to envelope mapping with extension overrides
//! - **Delivery**: batch aggregation and a streaming producer/consumer pipeline
//! - **Schedule**: fixed-interval cycles with drift-corrected windows
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use cts_exporter::{
//!     AccountIdentity, EventTransformer, Exporter, HttpSink, HttpTraceSource, TimeWindow,
//!     TraceQuerier,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = HttpTraceSource::new("https://cts.eu-de.otc.t-systems.com", "proj", None, Duration::from_secs(30))?;
//! let querier = TraceQuerier::new(Arc::new(source), "system", 100);
//! let transformer = EventTransformer::new(querier.endpoint(), AccountIdentity::default(), Default::default());
//! let sink = HttpSink::new("http://localhost:8080/".parse()?, Duration::from_secs(30))?;
//! let exporter = Exporter::new(querier, transformer, Arc::new(sink), true);
//!
//! let window = TimeWindow::calculate(chrono::Utc::now(), 5, Duration::ZERO);
//! let report = exporter.run_batch(window).await?;
//! println!("collected {}", report.collected);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod delivery;
pub mod events;
pub mod exporter;
pub mod logging;
pub mod schedule;
pub mod source;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, ExporterConfig};
pub use delivery::{DeliveryAggregator, DeliveryError, DeliveryResult, EventSink, HttpSink};
pub use events::{AccountIdentity, EventEnvelope, EventTransformer};
pub use exporter::{BatchReport, Exporter};
pub use schedule::{CycleMode, CycleReport, CycleRunner, DriftTracker, Scheduler, TimeWindow};
pub use source::{HttpTraceSource, QueryError, QueryOutcome, TraceQuerier, TraceSource};
