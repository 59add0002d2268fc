//! Metric sinks — where a check run sends its observations.

use tracing::trace;

use crate::observation::Observation;

/// Receives observations as a check run produces them.
pub trait MetricSink: Send {
    fn emit(&mut self, observation: Observation);
}

/// Collects observations in emission order.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    observations: Vec<Observation>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_observations(self) -> Vec<Observation> {
        self.observations
    }
}

impl MetricSink for MemorySink {
    fn emit(&mut self, observation: Observation) {
        trace!(name = %observation.name, value = observation.value, "observation");
        self.observations.push(observation);
    }
}
