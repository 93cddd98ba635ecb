use crate::config::QakkaConfig;
use crate::types::{QueueName, Region};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Persisted configuration of a queue. Created once by an admin call and
/// immutable afterwards except for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub name: QueueName,
    /// Free-form type tag carried for the benefit of consumer adapters.
    pub queue_type: String,
    /// Region whose actor serves consumers of this queue instance.
    pub local_region: Region,
    /// Region where the queue was originally created.
    pub origin_region: Region,
    /// Default delivery delay applied to sends that do not specify one.
    pub delay_ms: u64,
    /// How long a delivered message stays inflight before redelivery.
    pub lease_seconds: u64,
    /// Redeliveries allowed before a message is dead-lettered.
    pub max_redeliveries: u32,
    /// All regions this queue spans.
    pub regions: Vec<Region>,
}

impl Queue {
    /// A queue in a single region with the process-wide defaults.
    pub fn new(name: QueueName, config: &QakkaConfig) -> Self {
        Self {
            name,
            queue_type: "default".to_string(),
            local_region: config.local_region.clone(),
            origin_region: config.local_region.clone(),
            delay_ms: 0,
            lease_seconds: config.lease.as_secs(),
            max_redeliveries: config.max_redeliveries,
            regions: vec![config.local_region.clone()],
        }
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_inherits_process_defaults() {
        let config = QakkaConfig::default();
        let queue = Queue::new(QueueName::new("orders"), &config);
        assert_eq!(queue.local_region, config.local_region);
        assert_eq!(queue.origin_region, config.local_region);
        assert_eq!(queue.lease_seconds, config.lease.as_secs());
        assert_eq!(queue.max_redeliveries, config.max_redeliveries);
        assert_eq!(queue.delay_ms, 0);
        assert_eq!(queue.regions, vec![config.local_region.clone()]);
    }

    #[test]
    fn serde_round_trip() {
        let queue = Queue::new(QueueName::new("orders"), &QakkaConfig::default());
        let bytes = rmp_serde::to_vec(&queue).unwrap();
        let decoded: Queue = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(queue, decoded);
    }
}
