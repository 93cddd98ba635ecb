use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buffer::QueueBuffer;
use crate::config::QakkaConfig;
use crate::error::QakkaError;
use crate::message::QueueMessage;
use crate::message_storage::MessageStorage;
use crate::metrics::QueueMetrics;
use crate::queue::Queue;
use crate::shard::{shard_for, Shard, ShardKind};
use crate::shard_allocator::ShardAllocator;
use crate::shard_storage::ShardStorage;
use crate::sweeper::{requeue_or_dead_letter, Requeue};
use crate::time_uuid::{TimeUuid, TimeUuidGenerator};
use crate::types::Region;

/// Requests accepted by a queue actor's mailbox.
#[derive(Debug)]
pub enum QueueActorRequest {
    /// Refill the in-memory buffer from storage if it is below the low
    /// watermark. No-op otherwise.
    Refresh,
    /// Forward a tick to the shard allocator.
    ShardCheck,
    /// Take up to `n` descriptors from the head of the buffer. Never blocks
    /// on storage; returns fewer when the buffer is short.
    GetNext {
        n: usize,
        reply: oneshot::Sender<Vec<QueueMessage>>,
    },
    /// Delete the inflight row; reclaim the body after the last outstanding
    /// delivery. Unknown ids are a no-op.
    Ack {
        queue_message_id: TimeUuid,
        reply: oneshot::Sender<Result<(), QakkaError>>,
    },
    /// Return the inflight row to available with an incremented redelivery
    /// count, or dead-letter it past the cap. Unknown ids are a no-op.
    Nack {
        queue_message_id: TimeUuid,
        reply: oneshot::Sender<Result<(), QakkaError>>,
    },
    /// Current in-memory buffer size. Operator/test surface.
    BufferSize { reply: oneshot::Sender<usize> },
}

/// Cheap handle to a running queue actor.
#[derive(Clone, Debug)]
pub struct QueueActorHandle {
    tx: mpsc::Sender<QueueActorRequest>,
    cancel: CancellationToken,
}

impl QueueActorHandle {
    pub async fn get_next(&self, n: usize) -> Result<Vec<QueueMessage>, QakkaError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QueueActorRequest::GetNext { n, reply })
            .await
            .map_err(|_| QakkaError::ShuttingDown)?;
        rx.await.map_err(|_| QakkaError::ShuttingDown)
    }

    pub async fn ack(&self, queue_message_id: TimeUuid) -> Result<(), QakkaError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QueueActorRequest::Ack {
                queue_message_id,
                reply,
            })
            .await
            .map_err(|_| QakkaError::ShuttingDown)?;
        rx.await.map_err(|_| QakkaError::ShuttingDown)?
    }

    pub async fn nack(&self, queue_message_id: TimeUuid) -> Result<(), QakkaError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QueueActorRequest::Nack {
                queue_message_id,
                reply,
            })
            .await
            .map_err(|_| QakkaError::ShuttingDown)?;
        rx.await.map_err(|_| QakkaError::ShuttingDown)?
    }

    pub async fn buffer_size(&self) -> Result<usize, QakkaError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QueueActorRequest::BufferSize { reply })
            .await
            .map_err(|_| QakkaError::ShuttingDown)?;
        rx.await.map_err(|_| QakkaError::ShuttingDown)
    }

    /// Fire-and-forget refresh request. Dropped when the mailbox is full —
    /// a queued refresh already covers it.
    pub fn request_refresh(&self) {
        let _ = self.tx.try_send(QueueActorRequest::Refresh);
    }

    /// Fire-and-forget allocator tick. Dropped when the mailbox is full.
    pub fn request_shard_check(&self) {
        let _ = self.tx.try_send(QueueActorRequest::ShardCheck);
    }

    /// Stop the actor. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Single-writer actor for one (queue, region).
///
/// Processes one mailbox request at a time, so at most one refresh is ever
/// in flight and no locking is needed around the buffer or cursors. It is
/// the sole issuer of DEFAULT→INFLIGHT transitions for its queue: a
/// descriptor reaches the buffer only after its inflight row is durable,
/// which is what protects against loss if a consumer crashes before acking.
///
/// Storage failures inside a handler are logged (or surfaced to the caller
/// for ack/nack) and the loop moves on to the next request; transient faults
/// never take the actor down.
pub struct QueueActor {
    queue: Queue,
    region: Region,
    config: Arc<QakkaConfig>,
    shards: Arc<dyn ShardStorage>,
    messages: Arc<dyn MessageStorage>,
    generator: Arc<TimeUuidGenerator>,
    metrics: Arc<QueueMetrics>,
    allocator: ShardAllocator,
    buffer: QueueBuffer,
    /// Per-shard resume position: the last queueMessageId seen there.
    cursors: HashMap<i64, TimeUuid>,
    /// For requeueing a refresh after a draining `GetNext`.
    self_tx: mpsc::Sender<QueueActorRequest>,
}

impl QueueActor {
    /// Spawn the actor task and return a handle to its mailbox.
    pub fn spawn(
        queue: Queue,
        config: Arc<QakkaConfig>,
        shards: Arc<dyn ShardStorage>,
        messages: Arc<dyn MessageStorage>,
        generator: Arc<TimeUuidGenerator>,
        metrics: Arc<QueueMetrics>,
        parent_cancel: &CancellationToken,
    ) -> QueueActorHandle {
        let (tx, rx) = mpsc::channel(config.mailbox_capacity);
        let cancel = parent_cancel.child_token();
        let region = config.local_region.clone();

        let allocator = ShardAllocator::new(
            queue.name.clone(),
            region.clone(),
            Arc::clone(&config),
            Arc::clone(&shards),
            Arc::clone(&metrics),
        );
        let buffer = QueueBuffer::new(config.buffer_target);

        let actor = QueueActor {
            queue,
            region,
            config,
            shards,
            messages,
            generator,
            metrics,
            allocator,
            buffer,
            cursors: HashMap::new(),
            self_tx: tx.clone(),
        };
        actor.metrics.active_actors.inc();
        tokio::spawn(actor.run(rx, cancel.clone()));

        QueueActorHandle { tx, cancel }
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<QueueActorRequest>,
        cancel: CancellationToken,
    ) {
        debug!(queue = %self.queue.name, region = %self.region, "queue actor started");
        let mut refresh_tick = tokio::time::interval(self.config.refresh_interval);
        let mut shard_tick = tokio::time::interval(self.config.shard_check_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = refresh_tick.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(queue = %self.queue.name, region = %self.region, "refresh failed: {e}");
                    }
                }
                _ = shard_tick.tick() => self.allocator.check().await,
                request = rx.recv() => match request {
                    None => break,
                    Some(request) => self.handle(request).await,
                }
            }
        }

        self.metrics.active_actors.dec();
        self.metrics.buffered_messages.sub(self.buffer.size() as i64);
        debug!(queue = %self.queue.name, region = %self.region, "queue actor stopped");
    }

    async fn handle(&mut self, request: QueueActorRequest) {
        match request {
            QueueActorRequest::Refresh => {
                if let Err(e) = self.refresh().await {
                    warn!(queue = %self.queue.name, region = %self.region, "refresh failed: {e}");
                }
            }
            QueueActorRequest::ShardCheck => self.allocator.check().await,
            QueueActorRequest::GetNext { n, reply } => self.get_next(n, reply),
            QueueActorRequest::Ack {
                queue_message_id,
                reply,
            } => {
                let _ = reply.send(self.ack(queue_message_id).await);
            }
            QueueActorRequest::Nack {
                queue_message_id,
                reply,
            } => {
                let _ = reply.send(self.nack(queue_message_id).await);
            }
            QueueActorRequest::BufferSize { reply } => {
                let _ = reply.send(self.buffer.size());
            }
        }
    }

    fn get_next(&mut self, n: usize, reply: oneshot::Sender<Vec<QueueMessage>>) {
        let batch = self.buffer.poll_up_to(n);
        let count = batch.len();

        if let Err(batch) = reply.send(batch) {
            // Consumer abandoned the call; the descriptors were never handed
            // out, so they go back to the head in order.
            self.buffer.push_front_batch(batch);
        } else {
            self.metrics.messages_delivered.inc_by(count as u64);
            self.metrics.buffered_messages.sub(count as i64);
        }

        if self.buffer.size() < self.config.low_watermark() {
            let _ = self.self_tx.try_send(QueueActorRequest::Refresh);
        }
    }

    /// Pull available rows into the buffer, moving each to inflight first.
    ///
    /// Active shards are walked oldest-first so old messages drain before the
    /// current shard; a shard whose pivot is still in the future is skipped —
    /// nothing routes there yet.
    async fn refresh(&mut self) -> Result<(), QakkaError> {
        if self.buffer.size() >= self.config.low_watermark() {
            return Ok(());
        }
        let mut budget = self
            .config
            .refresh_batch
            .min(self.buffer.remaining_capacity());
        if budget == 0 {
            return Ok(());
        }

        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let now_bound = TimeUuid::start_of(now_ms + 1);

        let default_shards = self
            .shards
            .list_shards(&self.queue.name, &self.region, ShardKind::Default)
            .await?;
        let inflight_shards = self
            .shards
            .list_shards(&self.queue.name, &self.region, ShardKind::Inflight)
            .await?;

        for shard in default_shards.iter().filter(|s| s.pivot <= now_bound) {
            if budget == 0 {
                break;
            }
            let cursor = self.cursors.get(&shard.shard_id).copied();
            let rows = self
                .messages
                .read_available(&self.queue.name, &self.region, shard.shard_id, cursor, budget)
                .await?;

            for row in rows {
                self.cursors.insert(shard.shard_id, row.queue_message_id);

                if row.is_expired(now) {
                    self.discard_expired(shard, &row).await?;
                    continue;
                }
                if row.queue_message_id.unix_ts_ms() > now_ms {
                    // Delayed send not yet due; the rest of this shard is
                    // even later in time order.
                    break;
                }

                self.move_to_inflight(row, &inflight_shards, now).await?;
                budget -= 1;
                if budget == 0 || self.buffer.is_full() {
                    budget = 0;
                    break;
                }
            }
        }
        Ok(())
    }

    async fn discard_expired(&self, shard: &Shard, row: &QueueMessage) -> Result<(), QakkaError> {
        let existed = self
            .messages
            .delete_available(
                &self.queue.name,
                &self.region,
                shard.shard_id,
                row.queue_message_id,
            )
            .await?;
        if existed {
            self.shards
                .increment_counter(
                    &self.queue.name,
                    &self.region,
                    ShardKind::Default,
                    shard.shard_id,
                    -1,
                )
                .await?;
            self.metrics.messages_expired.inc();
            debug!(
                queue = %self.queue.name,
                message_id = %row.message_id,
                "discarded expired message"
            );
        }
        Ok(())
    }

    /// The DEFAULT→INFLIGHT transition. The inflight row is written before
    /// the available row is deleted; the sweeper tolerates the both-exist
    /// crash window in between.
    async fn move_to_inflight(
        &mut self,
        row: QueueMessage,
        inflight_shards: &[Shard],
        now: DateTime<Utc>,
    ) -> Result<(), QakkaError> {
        let queue_message_id = self.generator.next()?;
        let target = shard_for(inflight_shards, queue_message_id).ok_or_else(|| {
            QakkaError::NoShardAvailable {
                queue: self.queue.name.clone(),
                region: self.region.clone(),
                kind: ShardKind::Inflight,
                queue_message_id,
            }
        })?;

        let source_shard = row.shard_id;
        let source_id = row.queue_message_id;
        let inflight_row = QueueMessage {
            queue_message_id,
            kind: ShardKind::Inflight,
            shard_id: target.shard_id,
            inflight_at: Some(now),
            ..row
        };

        self.messages.write_inflight(&inflight_row).await?;
        let existed = self
            .messages
            .delete_available(&self.queue.name, &self.region, source_shard, source_id)
            .await?;
        if existed {
            self.shards
                .increment_counter(
                    &self.queue.name,
                    &self.region,
                    ShardKind::Default,
                    source_shard,
                    -1,
                )
                .await?;
        } else {
            // This actor is the sole mover for its queue, so the source row
            // should always still be there.
            warn!(
                queue = %self.queue.name,
                queue_message_id = %source_id,
                "available row vanished during transition"
            );
        }
        self.shards
            .increment_counter(
                &self.queue.name,
                &self.region,
                ShardKind::Inflight,
                target.shard_id,
                1,
            )
            .await?;

        self.buffer.append(inflight_row);
        self.metrics.buffered_messages.inc();
        Ok(())
    }

    async fn ack(&mut self, queue_message_id: TimeUuid) -> Result<(), QakkaError> {
        let Some(row) = self
            .messages
            .take_inflight(&self.queue.name, &self.region, queue_message_id)
            .await?
        else {
            debug!(queue = %self.queue.name, %queue_message_id, "ack for unknown id");
            return Ok(());
        };

        self.shards
            .increment_counter(
                &self.queue.name,
                &self.region,
                ShardKind::Inflight,
                row.shard_id,
                -1,
            )
            .await?;
        if self
            .messages
            .message_row_count(&self.queue.name, &self.region, row.message_id)
            .await?
            == 0
        {
            self.messages.delete_body(row.message_id).await?;
        }
        self.metrics.messages_acked.inc();
        Ok(())
    }

    async fn nack(&mut self, queue_message_id: TimeUuid) -> Result<(), QakkaError> {
        let Some(row) = self
            .messages
            .take_inflight(&self.queue.name, &self.region, queue_message_id)
            .await?
        else {
            debug!(queue = %self.queue.name, %queue_message_id, "nack for unknown id");
            return Ok(());
        };

        let outcome = requeue_or_dead_letter(
            row,
            &self.queue,
            &self.region,
            &self.generator,
            &self.shards,
            &self.messages,
            &self.metrics,
        )
        .await?;
        if outcome == Requeue::Redelivered {
            self.metrics.messages_nacked.inc();
        }
        Ok(())
    }
}
