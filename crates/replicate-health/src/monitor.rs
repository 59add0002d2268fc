//! Runs the check for every configured instance, once or on an interval.
//!
//! Instances run one after another; each gets its own sink so observations
//! from one instance never mix with another's.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use replicate_metrics::Observation;

use crate::check::{ReplicationCheck, RunReport};
use crate::config::CheckConfig;
use crate::kv::KvBackend;
use crate::process::ProcessInspector;

/// Result of one instance within a round.
#[derive(Debug, Clone)]
pub struct InstanceRun {
    pub index: usize,
    pub report: RunReport,
    pub observations: Vec<Observation>,
}

/// Whether every instance in a round succeeded.
pub fn all_succeeded(runs: &[InstanceRun]) -> bool {
    runs.iter().all(|r| r.report.outcome.is_success())
}

/// Drives a [`ReplicationCheck`] over a list of instances.
pub struct CheckRunner<K, P> {
    check: ReplicationCheck<K, P>,
    instances: Vec<CheckConfig>,
}

impl<K: KvBackend, P: ProcessInspector> CheckRunner<K, P> {
    pub fn new(check: ReplicationCheck<K, P>, instances: Vec<CheckConfig>) -> Self {
        Self { check, instances }
    }

    /// Run every instance once, in configuration order.
    pub async fn run_once(&self) -> Vec<InstanceRun> {
        let mut runs = Vec::with_capacity(self.instances.len());
        for (index, instance) in self.instances.iter().enumerate() {
            debug!(index, master_dc_path = %instance.master_dc_path, "running instance");
            let (report, observations) = self.check.run_collect(instance).await;
            if !report.outcome.is_success() {
                warn!(index, outcome = ?report.outcome, "instance check failed");
            }
            runs.push(InstanceRun {
                index,
                report,
                observations,
            });
        }
        runs
    }

    /// Run a round immediately, then every `interval`, until `shutdown` flips
    /// or `on_round` breaks.
    ///
    /// `on_round` sees each round's results. Returns the number of rounds run.
    pub async fn run_periodic<F>(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        mut on_round: F,
    ) -> u64
    where
        F: FnMut(&[InstanceRun]) -> ControlFlow<()>,
    {
        info!(interval = ?interval, instances = self.instances.len(), "periodic checks starting");
        let mut rounds = 0u64;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let runs = self.run_once().await;
            rounds += 1;
            if on_round(&runs).is_break() {
                debug!(rounds, "round handler asked to stop");
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!(rounds, "periodic checks stopped");
        rounds
    }
}
