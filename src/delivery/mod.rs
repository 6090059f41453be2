//! Delivery of envelopes to the sink
//!
//! Batch delivery goes through [`DeliveryAggregator`], which keeps sending
//! after a failure and reports every failed envelope. The streaming mode
//! wires the querier and the sink together through [`StreamingPipeline`].

pub mod aggregator;
pub mod sink;
pub mod stream;

pub use aggregator::{DeliveryAggregator, DeliveryError, DeliveryFailure, DeliveryResult};
pub use sink::{EventSink, HttpSink, SinkError};
pub use stream::{ProducerReport, StreamReport, StreamingPipeline};
