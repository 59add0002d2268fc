//! The replication health check.
//!
//! One run walks a fixed sequence against the local agent:
//!
//! 1. read the agent's own datacenter (fatal on failure)
//! 2. check that exactly one replication agent process is running
//! 3. read the master datacenter marker (fatal on failure)
//! 4. emit `in_master_dc`
//! 5. outside the master datacenter, compare every configured path
//!    between the local and master views
//!
//! Per-path problems are reported as gauges and never fail the run. Only
//! the two datacenter lookups and an indeterminate process inspection
//! turn the outcome into a failure.

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use replicate_metrics::{MemorySink, MetricSink, Observation, Tag};

use crate::config::{CheckConfig, Settings};
use crate::kv::KvBackend;
use crate::process::ProcessInspector;

pub const METRIC_RUNNING: &str = "running";
pub const METRIC_IN_MASTER_DC: &str = "in_master_dc";
pub const METRIC_VALUE_MISMATCH: &str = "value_mismatch";
pub const METRIC_VALUE_READABLE: &str = "value_readable";

/// Result of comparing one path between datacenters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    /// Both values read and are byte-identical.
    Match,
    /// Both values read and differ.
    Mismatch,
    /// At least one side could not be read.
    Unreadable,
}

/// Per-path detail of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathReport {
    pub path: String,
    pub prefix: String,
    pub status: PathStatus,
}

/// What the process inspection concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    NotRunning,
    /// The inspection failed or was ambiguous; `running` was not emitted.
    Indeterminate,
}

/// Which lookup aborted a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalStage {
    LocalDatacenter,
    MasterDatacenter,
}

/// Overall outcome of a run, reported to whoever scheduled it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// The run completed but liveness could not be determined.
    LivenessIndeterminate,
    /// A datacenter lookup failed and the run stopped early.
    Aborted { stage: FatalStage, reason: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }
}

/// Everything a run learned, besides the observations it emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub local_dc: Option<String>,
    pub master_dc: Option<String>,
    pub liveness: Option<Liveness>,
    pub paths: Vec<PathReport>,
}

impl RunReport {
    fn aborted(stage: FatalStage, reason: String) -> Self {
        Self {
            outcome: RunOutcome::Aborted { stage, reason },
            local_dc: None,
            master_dc: None,
            liveness: None,
            paths: Vec::new(),
        }
    }
}

/// Runs the replication check against injected KV and process backends.
pub struct ReplicationCheck<K, P> {
    kv: K,
    inspector: P,
    process_name: String,
    metric_prefix: String,
}

impl<K: KvBackend, P: ProcessInspector> ReplicationCheck<K, P> {
    pub fn new(kv: K, inspector: P, settings: &Settings) -> Self {
        Self {
            kv,
            inspector,
            process_name: settings.process_name.clone(),
            metric_prefix: settings.metric_prefix.clone(),
        }
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    fn metric(&self, name: &str) -> String {
        format!("{}{}", self.metric_prefix, name)
    }

    /// Run once, collecting observations in emission order.
    pub async fn run_collect(&self, config: &CheckConfig) -> (RunReport, Vec<Observation>) {
        let mut sink = MemorySink::new();
        let report = self.run(config, &mut sink).await;
        (report, sink.into_observations())
    }

    /// Run once, emitting observations into `sink`.
    pub async fn run(&self, config: &CheckConfig, sink: &mut dyn MetricSink) -> RunReport {
        let local_dc = match self.kv.agent_datacenter().await {
            Ok(dc) => dc,
            Err(e) => {
                error!(error = %e, "failed to read the local agent's datacenter");
                return RunReport::aborted(FatalStage::LocalDatacenter, e.to_string());
            }
        };

        let mut tags = vec![Tag::new("dc", local_dc.as_str())];
        tags.extend(config.tags.iter().map(|t| Tag::parse(t)));

        let liveness = self.check_liveness(&tags, sink).await;

        let master_dc = match self.kv.read(&config.master_dc_path, None).await {
            Ok(raw) => String::from_utf8_lossy(&raw).into_owned(),
            Err(e) => {
                error!(
                    path = %config.master_dc_path,
                    error = %e,
                    "failed to read the replication master datacenter"
                );
                return RunReport {
                    outcome: RunOutcome::Aborted {
                        stage: FatalStage::MasterDatacenter,
                        reason: e.to_string(),
                    },
                    local_dc: Some(local_dc),
                    master_dc: None,
                    liveness: Some(liveness),
                    paths: Vec::new(),
                };
            }
        };

        let in_master = master_dc == local_dc;
        sink.emit(Observation::flag(self.metric(METRIC_IN_MASTER_DC), in_master, &tags));

        let mut paths = Vec::new();
        if in_master {
            debug!(dc = %local_dc, "in the master datacenter, skipping path comparison");
        } else {
            for path in &config.check_paths {
                paths.push(self.check_path(path, &master_dc, &tags, sink).await);
            }
        }

        let outcome = if liveness == Liveness::Indeterminate {
            RunOutcome::LivenessIndeterminate
        } else {
            RunOutcome::Success
        };

        info!(
            local_dc = %local_dc,
            master_dc = %master_dc,
            ?liveness,
            paths = paths.len(),
            mismatched = paths.iter().filter(|p| p.status == PathStatus::Mismatch).count(),
            unreadable = paths.iter().filter(|p| p.status == PathStatus::Unreadable).count(),
            "replication check finished"
        );

        RunReport {
            outcome,
            local_dc: Some(local_dc),
            master_dc: Some(master_dc),
            liveness: Some(liveness),
            paths,
        }
    }

    async fn check_liveness(&self, tags: &[Tag], sink: &mut dyn MetricSink) -> Liveness {
        match self
            .inspector
            .is_running_exactly_once(&self.process_name)
            .await
        {
            Ok(running) => {
                sink.emit(Observation::flag(self.metric(METRIC_RUNNING), running, tags));
                if running {
                    Liveness::Running
                } else {
                    warn!(process = %self.process_name, "replication agent is not running");
                    Liveness::NotRunning
                }
            }
            Err(e) => {
                warn!(process = %self.process_name, error = %e, "process inspection inconclusive");
                Liveness::Indeterminate
            }
        }
    }

    async fn check_path(
        &self,
        path: &str,
        master_dc: &str,
        base_tags: &[Tag],
        sink: &mut dyn MetricSink,
    ) -> PathReport {
        let prefix = path_prefix(path).to_string();
        let mut tags = base_tags.to_vec();
        tags.push(Tag::new("prefix", prefix.as_str()));

        let status = match self.read_pair(path, master_dc).await {
            Some((local, master)) => {
                let status = if local == master {
                    PathStatus::Match
                } else {
                    PathStatus::Mismatch
                };
                sink.emit(Observation::flag(
                    self.metric(METRIC_VALUE_MISMATCH),
                    status == PathStatus::Mismatch,
                    &tags,
                ));
                sink.emit(Observation::flag(self.metric(METRIC_VALUE_READABLE), true, &tags));
                status
            }
            None => {
                sink.emit(Observation::flag(self.metric(METRIC_VALUE_READABLE), false, &tags));
                PathStatus::Unreadable
            }
        };

        debug!(%path, ?status, "path compared");
        PathReport {
            path: path.to_string(),
            prefix,
            status,
        }
    }

    /// Read `path` locally, then from `master_dc`. `None` if either read fails.
    async fn read_pair(&self, path: &str, master_dc: &str) -> Option<(Bytes, Bytes)> {
        let local = match self.kv.read(path, None).await {
            Ok(v) => v,
            Err(e) => {
                warn!(%path, error = %e, "failed to read local value");
                return None;
            }
        };
        match self.kv.read(path, Some(master_dc)).await {
            Ok(master) => Some((local, master)),
            Err(e) => {
                warn!(%path, dc = %master_dc, error = %e, "failed to read master value");
                None
            }
        }
    }
}

/// The first segment of a key path, used for the `prefix:` tag.
///
/// Leading slashes are ignored, so `/app/config` and `app/config` both give `app`.
/// This departs from the dd-agent check, which splits the raw path and so tags
/// `/app/config` with an empty prefix. Consul strips the leading slash from keys,
/// so both spellings address the same key and share a tag here.
pub fn path_prefix(path: &str) -> &str {
    let trimmed = path.trim_start_matches('/');
    trimmed
        .split_once('/')
        .map_or(trimmed, |(head, _)| head)
}
