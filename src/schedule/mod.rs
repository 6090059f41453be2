//! Cycle scheduling: query windows, drift correction and the polling loop

pub mod drift;
pub mod scheduler;
pub mod window;

pub use drift::DriftTracker;
pub use scheduler::{CycleMode, CycleReport, CycleRunner, Scheduler};
pub use window::TimeWindow;
