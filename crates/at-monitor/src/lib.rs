//! # at-monitor
//!
//! Resource monitoring for autotune. Tuning loops consult a
//! [`ResourceMonitor`] before every evaluation; [`MemoryMonitor`] is the
//! production implementation, polling system memory on its own thread and
//! publishing [`MemoryAlert`]s over a crossbeam channel.

pub mod alerts;
pub mod monitor;
pub mod sampler;

pub use alerts::{AlertTally, MemoryAlert, MemorySeverity};
pub use monitor::{AlwaysSafe, MemoryMonitor, MemorySummary, ResourceMonitor, SUMMARY_WINDOW};
pub use sampler::{MemorySample, MemorySampler, ProcMeminfoSampler};
