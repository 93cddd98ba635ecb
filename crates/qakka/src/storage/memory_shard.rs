use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::QakkaError;
use crate::shard::{Shard, ShardKind};
use crate::shard_storage::ShardStorage;
use crate::types::{QueueName, Region};

type ShardKey = (QueueName, Region, ShardKind, i64);

/// In-memory shard metadata and counter storage.
///
/// Shards are held keyed by (queue, region, kind, shardId); since pivots are
/// strictly increasing with shardId, iterating a key range yields them in
/// pivot order, matching the clustered layout of the real store.
#[derive(Default)]
pub struct MemoryShardStorage {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    shards: BTreeMap<ShardKey, Shard>,
    counters: HashMap<ShardKey, i64>,
}

impl MemoryShardStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShardStorage for MemoryShardStorage {
    async fn create_shard(&self, shard: &Shard) -> Result<(), QakkaError> {
        let key = (
            shard.queue.clone(),
            shard.region.clone(),
            shard.kind,
            shard.shard_id,
        );
        let mut inner = self.inner.lock();
        if inner.shards.contains_key(&key) {
            return Err(QakkaError::ShardExists {
                queue: shard.queue.clone(),
                region: shard.region.clone(),
                kind: shard.kind,
                shard_id: shard.shard_id,
            });
        }
        inner.shards.insert(key, shard.clone());
        Ok(())
    }

    async fn list_shards(
        &self,
        queue: &QueueName,
        region: &Region,
        kind: ShardKind,
    ) -> Result<Vec<Shard>, QakkaError> {
        let inner = self.inner.lock();
        let lo = (queue.clone(), region.clone(), kind, i64::MIN);
        let hi = (queue.clone(), region.clone(), kind, i64::MAX);
        Ok(inner.shards.range(lo..=hi).map(|(_, s)| s.clone()).collect())
    }

    async fn delete_shards(&self, queue: &QueueName, region: &Region) -> Result<(), QakkaError> {
        let mut inner = self.inner.lock();
        inner
            .shards
            .retain(|(q, r, _, _), _| !(q == queue && r == region));
        inner
            .counters
            .retain(|(q, r, _, _), _| !(q == queue && r == region));
        Ok(())
    }

    async fn increment_counter(
        &self,
        queue: &QueueName,
        region: &Region,
        kind: ShardKind,
        shard_id: i64,
        delta: i64,
    ) -> Result<(), QakkaError> {
        let key = (queue.clone(), region.clone(), kind, shard_id);
        let mut inner = self.inner.lock();
        *inner.counters.entry(key).or_insert(0) += delta;
        Ok(())
    }

    async fn counter_value(
        &self,
        queue: &QueueName,
        region: &Region,
        kind: ShardKind,
        shard_id: i64,
    ) -> Result<Option<i64>, QakkaError> {
        let key = (queue.clone(), region.clone(), kind, shard_id);
        Ok(self.inner.lock().counters.get(&key).copied())
    }
}
