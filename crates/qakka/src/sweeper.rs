use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::QakkaConfig;
use crate::error::QakkaError;
use crate::message::QueueMessage;
use crate::message_storage::MessageStorage;
use crate::metrics::QueueMetrics;
use crate::queue::Queue;
use crate::queue_storage::QueueStorage;
use crate::shard::{shard_for, ShardKind};
use crate::shard_storage::ShardStorage;
use crate::time_uuid::TimeUuidGenerator;
use crate::types::Region;

/// Outcome of returning a taken inflight row to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Requeue {
    Redelivered,
    DeadLettered,
}

/// Return an inflight row the caller has already taken (won the conditional
/// delete for) to the available family as a fresh delivery attempt, or
/// dead-letter it past the queue's redelivery cap.
///
/// Shared by the sweeper (lease expiry) and the queue actor (explicit nack);
/// both paths are by then the sole owner of the row, so the dual-queue
/// bookkeeping is identical.
pub(crate) async fn requeue_or_dead_letter(
    row: QueueMessage,
    queue: &Queue,
    region: &Region,
    generator: &TimeUuidGenerator,
    shards: &Arc<dyn ShardStorage>,
    messages: &Arc<dyn MessageStorage>,
    metrics: &QueueMetrics,
) -> Result<Requeue, QakkaError> {
    shards
        .increment_counter(&queue.name, region, ShardKind::Inflight, row.shard_id, -1)
        .await?;

    if row.n_returned + 1 > queue.max_redeliveries {
        messages.delete_body(row.message_id).await?;
        metrics.dead_letters.inc();
        warn!(
            queue = %queue.name,
            %region,
            message_id = %row.message_id,
            n_returned = row.n_returned,
            "message exceeded redelivery cap, dead-lettered"
        );
        return Ok(Requeue::DeadLettered);
    }

    let queue_message_id = generator.next()?;
    let default_shards = shards
        .list_shards(&queue.name, region, ShardKind::Default)
        .await?;
    let target = shard_for(&default_shards, queue_message_id).ok_or_else(|| {
        QakkaError::NoShardAvailable {
            queue: queue.name.clone(),
            region: region.clone(),
            kind: ShardKind::Default,
            queue_message_id,
        }
    })?;

    let requeued = QueueMessage {
        queue_message_id,
        kind: ShardKind::Default,
        shard_id: target.shard_id,
        queued_at: Utc::now(),
        inflight_at: None,
        n_returned: row.n_returned + 1,
        ..row
    };
    messages.write_available(&requeued).await?;
    shards
        .increment_counter(
            &queue.name,
            region,
            ShardKind::Default,
            target.shard_id,
            1,
        )
        .await?;

    Ok(Requeue::Redelivered)
}

/// Background task that returns lease-expired inflight rows for redelivery.
///
/// The sweeper is the sole issuer of INFLIGHT→DEFAULT transitions for
/// expired rows. It reads a row before acting; the conditional delete in
/// `take_inflight` resolves the race with a concurrent ack — if the row has
/// disappeared, the sweeper skips it. A failed pass is logged and retried on
/// the next tick.
pub struct TimeoutSweeper {
    region: Region,
    config: Arc<QakkaConfig>,
    queues: Arc<dyn QueueStorage>,
    shards: Arc<dyn ShardStorage>,
    messages: Arc<dyn MessageStorage>,
    generator: Arc<TimeUuidGenerator>,
    metrics: Arc<QueueMetrics>,
    cancel: CancellationToken,
}

impl TimeoutSweeper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<QakkaConfig>,
        queues: Arc<dyn QueueStorage>,
        shards: Arc<dyn ShardStorage>,
        messages: Arc<dyn MessageStorage>,
        generator: Arc<TimeUuidGenerator>,
        metrics: Arc<QueueMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            region: config.local_region.clone(),
            config,
            queues,
            shards,
            messages,
            generator,
            metrics,
            cancel,
        }
    }

    /// Run the sweep loop. Blocks until the cancellation token fires.
    pub async fn run(&self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.sweeper_interval) => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// Perform a single sweep pass over every local queue. Returns how many
    /// rows were moved (redelivered or dead-lettered).
    pub async fn sweep_once(&self) -> usize {
        let queues = match self.queues.all_queues().await {
            Ok(queues) => queues,
            Err(e) => {
                warn!(region = %self.region, "sweep could not list queues: {e}");
                return 0;
            }
        };

        let mut total = 0;
        for queue in &queues {
            match self.sweep_queue(queue).await {
                Ok(moved) => {
                    if moved > 0 {
                        debug!(queue = %queue.name, region = %self.region, moved, "swept expired inflight rows");
                    }
                    total += moved;
                }
                Err(e) => {
                    warn!(queue = %queue.name, region = %self.region, "sweep failed: {e}");
                }
            }
        }
        total
    }

    async fn sweep_queue(&self, queue: &Queue) -> Result<usize, QakkaError> {
        let now = Utc::now();
        let lease = ChronoDuration::seconds(queue.lease_seconds as i64);
        let rows = self
            .messages
            .list_inflight(&queue.name, &self.region, self.config.sweep_batch)
            .await?;

        let mut moved = 0;
        for row in rows {
            let Some(inflight_at) = row.inflight_at else {
                continue;
            };
            if now.signed_duration_since(inflight_at) <= lease {
                continue;
            }

            // An ack may land between the read above and here; whoever's
            // delete returns the row owns the transition.
            let Some(owned) = self
                .messages
                .take_inflight(&queue.name, &self.region, row.queue_message_id)
                .await?
            else {
                continue;
            };

            let outcome = requeue_or_dead_letter(
                owned,
                queue,
                &self.region,
                &self.generator,
                &self.shards,
                &self.messages,
                &self.metrics,
            )
            .await?;
            if outcome == Requeue::Redelivered {
                self.metrics.messages_redelivered.inc();
            }
            moved += 1;
        }
        Ok(moved)
    }
}
