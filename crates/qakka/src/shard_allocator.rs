use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::QakkaConfig;
use crate::error::QakkaError;
use crate::metrics::QueueMetrics;
use crate::shard::{Shard, ShardKind};
use crate::shard_storage::ShardStorage;
use crate::time_uuid::TimeUuid;
use crate::types::{QueueName, Region};

/// Fraction of `max_shard_size` at which the next shard is cut.
const ALLOCATION_THRESHOLD: f64 = 0.9;

/// Allocates new shards for one (queue, region) as the current ones fill.
///
/// On each tick it inspects the latest shard of each kind; when its counter
/// crosses the threshold, the next shard is created with a pivot slightly in
/// the future, so producers in the window between allocator runs keep routing
/// into the current shard rather than racing into an empty new one.
///
/// Runs inside the queue actor's message loop, so there is exactly one
/// allocator executing per queue per region; the conditional shard insert is
/// the backstop against duplicate allocation under extreme races.
pub struct ShardAllocator {
    queue: QueueName,
    region: Region,
    config: Arc<QakkaConfig>,
    shards: Arc<dyn ShardStorage>,
    metrics: Arc<QueueMetrics>,
}

impl ShardAllocator {
    pub fn new(
        queue: QueueName,
        region: Region,
        config: Arc<QakkaConfig>,
        shards: Arc<dyn ShardStorage>,
        metrics: Arc<QueueMetrics>,
    ) -> Self {
        Self {
            queue,
            region,
            config,
            shards,
            metrics,
        }
    }

    /// One allocator tick: check both shard kinds. Failures are logged and
    /// dropped — the next tick re-evaluates from storage. Never fatal.
    pub async fn check(&self) {
        for kind in ShardKind::ALL {
            if let Err(e) = self.check_latest_shard(kind).await {
                warn!(
                    queue = %self.queue,
                    region = %self.region,
                    %kind,
                    "shard check failed: {e}"
                );
            }
        }
    }

    async fn check_latest_shard(&self, kind: ShardKind) -> Result<(), QakkaError> {
        let shards = self
            .shards
            .list_shards(&self.queue, &self.region, kind)
            .await?;

        let Some(latest) = shards.last() else {
            // Shard-0 is cut at queue-create time; nothing to grow from.
            warn!(queue = %self.queue, region = %self.region, %kind, "no shard found");
            return Ok(());
        };

        let counter = self
            .shards
            .counter_value(&self.queue, &self.region, kind, latest.shard_id)
            .await?
            .unwrap_or(0);

        if (counter as f64) <= ALLOCATION_THRESHOLD * self.config.max_shard_size as f64 {
            return Ok(());
        }

        let pivot_ms = Utc::now().timestamp_millis()
            + self.config.shard_allocation_advance.as_millis() as i64;
        let new_shard = Shard::new(
            self.queue.clone(),
            self.region.clone(),
            kind,
            latest.shard_id + 1,
            TimeUuid::start_of(pivot_ms),
        );

        match self.shards.create_shard(&new_shard).await {
            Ok(()) => {
                self.shards
                    .increment_counter(&self.queue, &self.region, kind, new_shard.shard_id, 0)
                    .await?;
                self.metrics.shards_allocated.inc();
                info!(
                    queue = %self.queue,
                    region = %self.region,
                    %kind,
                    shard_id = new_shard.shard_id,
                    counter,
                    "allocated new shard"
                );
            }
            Err(QakkaError::ShardExists { shard_id, .. }) => {
                // Another allocator got there first; it is now the latest.
                debug!(queue = %self.queue, %kind, shard_id, "shard already allocated");
            }
            Err(e) => return Err(e),
        }

        Ok(())
    }
}
