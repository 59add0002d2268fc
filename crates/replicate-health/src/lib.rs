//! replicate-health — health checking for consul-replicate.
//!
//! Verifies that the replication agent is running and that replicated keys
//! in the local datacenter match the master datacenter's copies. Results
//! are reported as gauges through a [`replicate_metrics::MetricSink`].
//!
//! # Architecture
//!
//! ```text
//! CheckRunner
//!   └── per instance: ReplicationCheck::run()
//!         ├── KvBackend (HttpKvClient → local Consul agent)
//!         │     ├── agent_datacenter()  → local dc
//!         │     └── read(path, dc?)     → raw value
//!         ├── ProcessInspector (PsInspector → ps -C)
//!         └── sink.emit(running / in_master_dc / value_mismatch / value_readable)
//! ```
//!
//! Only failing to learn the local or master datacenter aborts a run.
//! Unreadable or mismatched paths are reported as gauges.

pub mod check;
pub mod config;
pub mod error;
pub mod kv;
pub mod monitor;
pub mod process;

pub use check::{
    FatalStage, Liveness, PathReport, PathStatus, ReplicationCheck, RunOutcome, RunReport,
    path_prefix,
};
pub use config::{CheckConfig, CheckFile, Settings};
pub use error::{ConfigError, KvError, ProcessError};
pub use kv::{HttpKvClient, KvBackend};
pub use monitor::{CheckRunner, InstanceRun, all_succeeded};
pub use process::{ProcessInspector, PsInspector};
