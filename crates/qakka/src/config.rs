use crate::error::QakkaError;
use crate::types::Region;
use std::time::Duration;

/// Process-wide configuration snapshot for the queue system.
///
/// Initialized once at startup and shared read-only; per-queue settings
/// (lease, delay, redelivery cap) live on the [`Queue`](crate::queue::Queue)
/// record and default from here at queue-create time.
#[derive(Debug, Clone)]
pub struct QakkaConfig {
    /// Region tag of this process.
    pub local_region: Region,
    /// Name this process registers under for queue-actor placement.
    pub member_name: String,
    /// All cluster members in this region participating in actor placement.
    /// Default: just this member (single-node).
    pub members: Vec<String>,
    /// Counter threshold: a shard whose counter exceeds 0.9 × this triggers
    /// allocation of the next shard. Default: 400 000.
    pub max_shard_size: i64,
    /// Future offset applied to a newly allocated shard's pivot, so producers
    /// in the window between allocator runs keep routing into the current
    /// shard. Default: 30s.
    pub shard_allocation_advance: Duration,
    /// How often each queue actor forwards a shard-check tick to the
    /// allocator. Default: 20s.
    pub shard_check_interval: Duration,
    /// Default lease: how long a message may remain inflight before the
    /// sweeper returns it for redelivery. Default: 30s.
    pub lease: Duration,
    /// Default cap on redeliveries before a message is dead-lettered.
    /// Default: 10.
    pub max_redeliveries: u32,
    /// Max rows moved DEFAULT→INFLIGHT per refresh pass. Default: 100.
    pub refresh_batch: usize,
    /// In-memory buffer high-water mark per queue actor. Refresh is a no-op
    /// once the buffer holds `buffer_target - refresh_batch` or more
    /// descriptors. Default: 1000.
    pub buffer_target: usize,
    /// How often each queue actor refreshes its buffer from storage on its
    /// own, independent of consumer traffic. Default: 500ms.
    pub refresh_interval: Duration,
    /// How often the sweeper scans for lease-expired inflight rows.
    /// Default: 5s.
    pub sweeper_interval: Duration,
    /// Max inflight rows examined per queue per sweep pass. Default: 1000.
    pub sweep_batch: usize,
    /// Soft deadline for a `get_next_messages` call; on expiry the caller
    /// gets whatever was buffered (possibly nothing). Default: 2s.
    pub get_next_timeout: Duration,
    /// Queue actor mailbox capacity. Default: 1024.
    pub mailbox_capacity: usize,
}

impl QakkaConfig {
    /// Validate configuration values. Returns `InvalidConfig` on the first
    /// violation found.
    pub fn validate(&self) -> Result<(), QakkaError> {
        if self.member_name.is_empty() {
            return Err(QakkaError::InvalidConfig {
                reason: "member_name must not be empty".to_string(),
            });
        }
        if !self.members.iter().any(|m| m == &self.member_name) {
            return Err(QakkaError::InvalidConfig {
                reason: format!("members must include member_name {:?}", self.member_name),
            });
        }
        if self.max_shard_size < 1 {
            return Err(QakkaError::InvalidConfig {
                reason: format!("max_shard_size must be >= 1, got {}", self.max_shard_size),
            });
        }
        if self.refresh_batch == 0 {
            return Err(QakkaError::InvalidConfig {
                reason: "refresh_batch must be >= 1".to_string(),
            });
        }
        if self.buffer_target < self.refresh_batch {
            return Err(QakkaError::InvalidConfig {
                reason: format!(
                    "buffer_target ({}) must be >= refresh_batch ({})",
                    self.buffer_target, self.refresh_batch
                ),
            });
        }
        if self.sweep_batch == 0 {
            return Err(QakkaError::InvalidConfig {
                reason: "sweep_batch must be >= 1".to_string(),
            });
        }
        if self.mailbox_capacity == 0 {
            return Err(QakkaError::InvalidConfig {
                reason: "mailbox_capacity must be >= 1".to_string(),
            });
        }
        if self.lease.is_zero() {
            return Err(QakkaError::InvalidConfig {
                reason: "lease must be > 0".to_string(),
            });
        }
        if self.shard_allocation_advance.is_zero() {
            return Err(QakkaError::InvalidConfig {
                reason: "shard_allocation_advance must be > 0".to_string(),
            });
        }
        if self.shard_check_interval.is_zero() {
            return Err(QakkaError::InvalidConfig {
                reason: "shard_check_interval must be > 0".to_string(),
            });
        }
        if self.refresh_interval.is_zero() {
            return Err(QakkaError::InvalidConfig {
                reason: "refresh_interval must be > 0".to_string(),
            });
        }
        if self.sweeper_interval.is_zero() {
            return Err(QakkaError::InvalidConfig {
                reason: "sweeper_interval must be > 0".to_string(),
            });
        }
        if self.get_next_timeout.is_zero() {
            return Err(QakkaError::InvalidConfig {
                reason: "get_next_timeout must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Buffer level below which a refresh pass actually pulls from storage.
    /// Never below 1, so an empty buffer always refreshes.
    pub fn low_watermark(&self) -> usize {
        self.buffer_target.saturating_sub(self.refresh_batch).max(1)
    }
}

impl Default for QakkaConfig {
    fn default() -> Self {
        Self {
            local_region: Region::new("us-east"),
            member_name: "qakka-1".to_string(),
            members: vec!["qakka-1".to_string()],
            max_shard_size: 400_000,
            shard_allocation_advance: Duration::from_secs(30),
            shard_check_interval: Duration::from_secs(20),
            lease: Duration::from_secs(30),
            max_redeliveries: 10,
            refresh_batch: 100,
            buffer_target: 1000,
            refresh_interval: Duration::from_millis(500),
            sweeper_interval: Duration::from_secs(5),
            sweep_batch: 1000,
            get_next_timeout: Duration::from_secs(2),
            mailbox_capacity: 1024,
        }
    }
}
