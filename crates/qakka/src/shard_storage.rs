use async_trait::async_trait;

use crate::error::QakkaError;
use crate::shard::{Shard, ShardKind};
use crate::types::{QueueName, Region};

/// Persistent storage for shard metadata and the per-shard row counters that
/// drive allocation.
///
/// Counters are a lower-bound estimate of live rows in a shard: incremented
/// and decremented by writers, never reset except when the queue is deleted.
#[async_trait]
pub trait ShardStorage: Send + Sync {
    /// Create a shard row. Fails with `ShardExists` when the
    /// (queue, region, kind, shardId) slot is already taken — the optimistic
    /// guard against duplicate allocation.
    async fn create_shard(&self, shard: &Shard) -> Result<(), QakkaError>;

    /// Shards for (queue, region, kind), ascending by pivot (equivalently by
    /// shardId — pivots are strictly increasing with it).
    async fn list_shards(
        &self,
        queue: &QueueName,
        region: &Region,
        kind: ShardKind,
    ) -> Result<Vec<Shard>, QakkaError>;

    /// Drop all shards and counters for (queue, region). Queue-delete cascade.
    async fn delete_shards(&self, queue: &QueueName, region: &Region) -> Result<(), QakkaError>;

    /// Atomically adjust a shard counter by `delta` (may be negative).
    /// A delta of 0 initializes an absent counter.
    async fn increment_counter(
        &self,
        queue: &QueueName,
        region: &Region,
        kind: ShardKind,
        shard_id: i64,
        delta: i64,
    ) -> Result<(), QakkaError>;

    /// Current counter value, or `None` if never written (callers treat an
    /// absent counter as 0).
    async fn counter_value(
        &self,
        queue: &QueueName,
        region: &Region,
        kind: ShardKind,
        shard_id: i64,
    ) -> Result<Option<i64>, QakkaError>;
}
