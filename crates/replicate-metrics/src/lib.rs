//! replicate-metrics — observations emitted by the consul-replicate check.
//!
//! A check run produces a flat list of gauge [`Observation`]s. Each one is
//! pushed through a [`MetricSink`] supplied by the caller, so no metric
//! buffer outlives the run that filled it.
//!
//! # Architecture
//!
//! ```text
//! ReplicationCheck
//!   └── sink.emit(Observation) ─→ MemorySink (collected per run)
//!                                   └── render() → text / json / prometheus
//! ```

pub mod observation;
pub mod render;
pub mod sink;

pub use observation::{Observation, Tag};
pub use render::{OutputFormat, render};
pub use sink::{MemorySink, MetricSink};
