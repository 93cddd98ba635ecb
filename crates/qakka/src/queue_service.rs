use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actor_registry::ActorRegistry;
use crate::config::QakkaConfig;
use crate::error::QakkaError;
use crate::message::{MessageBody, QueueMessage};
use crate::message_storage::MessageStorage;
use crate::metrics::QueueMetrics;
use crate::placement::QueuePlacement;
use crate::queue::Queue;
use crate::queue_storage::QueueStorage;
use crate::shard::{shard_for, Shard, ShardKind};
use crate::shard_storage::ShardStorage;
use crate::sweeper::TimeoutSweeper;
use crate::time_uuid::{TimeUuid, TimeUuidGenerator};
use crate::transport::{RegionTransport, SendEnvelope};
use crate::types::{QueueName, Region};

/// The distributed queue facade for one region of one process.
///
/// Routes `send`/`get`/`ack`/`nack` to the right queue actor — spawning it on
/// first use when this member owns the queue — or forwards sends toward their
/// destination region. Owns the sweeper task and the actor registry; both are
/// torn down by [`shutdown`](Self::shutdown).
pub struct QueueService {
    config: Arc<QakkaConfig>,
    queues: Arc<dyn QueueStorage>,
    shards: Arc<dyn ShardStorage>,
    messages: Arc<dyn MessageStorage>,
    generator: Arc<TimeUuidGenerator>,
    metrics: Arc<QueueMetrics>,
    placement: QueuePlacement,
    transport: Arc<dyn RegionTransport>,
    actors: ActorRegistry,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl QueueService {
    /// Wire up a service from its collaborators and start the sweeper.
    pub fn new(
        config: QakkaConfig,
        queues: Arc<dyn QueueStorage>,
        shards: Arc<dyn ShardStorage>,
        messages: Arc<dyn MessageStorage>,
        transport: Arc<dyn RegionTransport>,
        metrics: Arc<QueueMetrics>,
    ) -> Result<Arc<Self>, QakkaError> {
        config.validate()?;
        let config = Arc::new(config);
        let generator = Arc::new(TimeUuidGenerator::new());
        let cancel = CancellationToken::new();

        let actors = ActorRegistry::new(
            Arc::clone(&config),
            Arc::clone(&queues),
            Arc::clone(&shards),
            Arc::clone(&messages),
            Arc::clone(&generator),
            Arc::clone(&metrics),
            cancel.clone(),
        );
        let placement = QueuePlacement::new(&config.members, config.member_name.clone());

        let sweeper = TimeoutSweeper::new(
            Arc::clone(&config),
            Arc::clone(&queues),
            Arc::clone(&shards),
            Arc::clone(&messages),
            Arc::clone(&generator),
            Arc::clone(&metrics),
            cancel.clone(),
        );
        tokio::spawn(async move { sweeper.run().await });

        Ok(Arc::new(Self {
            config,
            queues,
            shards,
            messages,
            generator,
            metrics,
            placement,
            transport,
            actors,
            cancel,
            closed: AtomicBool::new(false),
        }))
    }

    fn local_region(&self) -> &Region {
        &self.config.local_region
    }

    fn ensure_open(&self) -> Result<(), QakkaError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QakkaError::ShuttingDown);
        }
        Ok(())
    }

    /// Create a queue and cut shard-0 of both kinds in the local region.
    pub async fn create_queue(&self, queue: Queue) -> Result<(), QakkaError> {
        self.ensure_open()?;
        self.queues.create_queue(&queue).await?;
        for kind in ShardKind::ALL {
            self.shards
                .create_shard(&Shard::zero(
                    queue.name.clone(),
                    self.local_region().clone(),
                    kind,
                ))
                .await?;
            self.shards
                .increment_counter(&queue.name, self.local_region(), kind, 0, 0)
                .await?;
        }
        info!(queue = %queue.name, region = %self.local_region(), "created queue");
        Ok(())
    }

    /// Delete a queue: stop its actor, purge rows, bodies, shards, and the
    /// config row. Deleting an unknown queue is a no-op.
    pub async fn delete_queue(&self, name: &QueueName) -> Result<(), QakkaError> {
        self.actors.stop(name);

        let message_ids = self.messages.purge_queue(name, self.local_region()).await?;
        for message_id in message_ids {
            self.messages.delete_body(message_id).await?;
        }
        self.shards.delete_shards(name, self.local_region()).await?;
        self.queues.delete_queue(name).await?;
        info!(queue = %name, region = %self.local_region(), "deleted queue");
        Ok(())
    }

    /// Write a payload body. Producers call this before the send, so the
    /// index row never points at a missing body.
    pub async fn write_message_data(
        &self,
        message_id: Uuid,
        body: &MessageBody,
    ) -> Result<(), QakkaError> {
        self.ensure_open()?;
        self.messages.write_body(message_id, body).await
    }

    /// Load a payload body; `None` once the final ack has reclaimed it.
    pub async fn load_message_data(
        &self,
        message_id: Uuid,
    ) -> Result<Option<MessageBody>, QakkaError> {
        self.messages.load_body(message_id).await
    }

    /// Route a send: write the index row locally when `dest_region` is ours,
    /// otherwise forward the envelope to a peer in that region.
    pub async fn send_message_to_region(
        &self,
        queue: &QueueName,
        source_region: &Region,
        dest_region: &Region,
        message_id: Uuid,
        delay: Option<Duration>,
        expiration: Option<Duration>,
    ) -> Result<(), QakkaError> {
        self.ensure_open()?;

        if dest_region == self.local_region() {
            return self.local_send(queue, message_id, delay, expiration).await;
        }

        let envelope = SendEnvelope {
            queue: queue.clone(),
            source_region: source_region.clone(),
            dest_region: dest_region.clone(),
            message_id,
            delay_ms: delay.map(|d| d.as_millis() as u64),
            expiration_secs: expiration.map(|d| d.as_secs()),
        };
        self.transport.forward_send(&envelope).await
    }

    /// Entry point for envelopes arriving from a peer region.
    pub async fn receive_send(&self, envelope: SendEnvelope) -> Result<(), QakkaError> {
        self.ensure_open()?;
        if envelope.dest_region != *self.local_region() {
            return Err(QakkaError::RegionUnknown {
                region: envelope.dest_region,
            });
        }
        self.local_send(
            &envelope.queue,
            envelope.message_id,
            envelope.delay_ms.map(Duration::from_millis),
            envelope.expiration_secs.map(Duration::from_secs),
        )
        .await
    }

    async fn local_send(
        &self,
        queue_name: &QueueName,
        message_id: Uuid,
        delay: Option<Duration>,
        expiration: Option<Duration>,
    ) -> Result<(), QakkaError> {
        let queue = self
            .queues
            .get_queue(queue_name)
            .await?
            .ok_or_else(|| QakkaError::QueueNotFound {
                name: queue_name.clone(),
            })?;

        let delay_ms = delay
            .map(|d| d.as_millis() as i64)
            .or((queue.delay_ms > 0).then_some(queue.delay_ms as i64));
        let now = Utc::now();
        let queue_message_id = match delay_ms {
            Some(ms) => self.generator.at_unix_ms(now.timestamp_millis() + ms),
            None => self.generator.next()?,
        };

        let default_shards = self
            .shards
            .list_shards(queue_name, self.local_region(), ShardKind::Default)
            .await?;
        let target = shard_for(&default_shards, queue_message_id).ok_or_else(|| {
            QakkaError::NoShardAvailable {
                queue: queue_name.clone(),
                region: self.local_region().clone(),
                kind: ShardKind::Default,
                queue_message_id,
            }
        })?;

        let mut row = QueueMessage::available(
            queue_message_id,
            message_id,
            queue_name.clone(),
            self.local_region().clone(),
            target.shard_id,
        );
        row.expires_at = expiration.map(|d| {
            now + chrono::Duration::milliseconds(d.as_millis() as i64)
        });

        self.messages.write_available(&row).await?;
        self.shards
            .increment_counter(
                queue_name,
                self.local_region(),
                ShardKind::Default,
                target.shard_id,
                1,
            )
            .await?;
        self.metrics.messages_sent.inc();
        debug!(queue = %queue_name, %message_id, shard_id = target.shard_id, "accepted message");
        Ok(())
    }

    /// Up to `n` descriptors from the queue's buffer, in rough time order.
    /// Unknown queues yield an empty batch; the soft deadline bounds how long
    /// the caller waits for the actor, not for messages to appear.
    pub async fn get_next_messages(
        &self,
        queue: &QueueName,
        n: usize,
    ) -> Result<Vec<QueueMessage>, QakkaError> {
        self.ensure_open()?;
        self.ensure_owner(queue)?;

        let handle = match self.actors.get_or_spawn(queue).await {
            Ok(handle) => handle,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        match tokio::time::timeout(self.config.get_next_timeout, handle.get_next(n)).await {
            Ok(result) => result,
            Err(_elapsed) => Ok(Vec::new()),
        }
    }

    /// Acknowledge a delivered message. Unknown queues or ids are a no-op.
    pub async fn ack_message(
        &self,
        queue: &QueueName,
        queue_message_id: TimeUuid,
    ) -> Result<(), QakkaError> {
        self.ensure_open()?;
        self.ensure_owner(queue)?;

        match self.actors.get_or_spawn(queue).await {
            Ok(handle) => handle.ack(queue_message_id).await,
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Return a delivered message for immediate redelivery (or dead-letter it
    /// past the cap). Unknown queues or ids are a no-op.
    pub async fn nack_message(
        &self,
        queue: &QueueName,
        queue_message_id: TimeUuid,
    ) -> Result<(), QakkaError> {
        self.ensure_open()?;
        self.ensure_owner(queue)?;

        match self.actors.get_or_spawn(queue).await {
            Ok(handle) => handle.nack(queue_message_id).await,
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Operator/test hook: ask every locally-owned queue actor to refresh
    /// now. Fire-and-forget; actors also refresh on their own timers.
    pub async fn refresh(&self) {
        let queues = match self.queues.all_queues().await {
            Ok(queues) => queues,
            Err(e) => {
                warn!(region = %self.local_region(), "refresh could not list queues: {e}");
                return;
            }
        };

        let spawns = queues
            .iter()
            .filter(|q| self.placement.is_local(&q.name))
            .map(|q| self.actors.get_or_spawn(&q.name));
        for result in join_all(spawns).await {
            match result {
                Ok(handle) => handle.request_refresh(),
                Err(e) if matches!(e, QakkaError::ShuttingDown) => return,
                Err(e) => warn!(region = %self.local_region(), "refresh spawn failed: {e}"),
            }
        }
    }

    /// Operator/test hook: run one allocator pass for a queue.
    pub async fn check_shards(&self, queue: &QueueName) -> Result<(), QakkaError> {
        self.ensure_open()?;
        let handle = self.actors.get_or_spawn(queue).await?;
        handle.request_shard_check();
        Ok(())
    }

    /// Estimated queue depth: the sum of DEFAULT and INFLIGHT shard counters.
    /// Counters are lower-bound estimates, so this is advisory.
    pub async fn queue_depth(&self, queue: &QueueName) -> Result<i64, QakkaError> {
        let mut depth = 0;
        for kind in ShardKind::ALL {
            for shard in self
                .shards
                .list_shards(queue, self.local_region(), kind)
                .await?
            {
                depth += self
                    .shards
                    .counter_value(queue, self.local_region(), kind, shard.shard_id)
                    .await?
                    .unwrap_or(0)
                    .max(0);
            }
        }
        Ok(depth)
    }

    /// Current in-memory buffer size for a queue. Test/operator surface.
    pub async fn buffer_size(&self, queue: &QueueName) -> Result<usize, QakkaError> {
        self.ensure_open()?;
        let handle = self.actors.get_or_spawn(queue).await?;
        handle.buffer_size().await
    }

    fn ensure_owner(&self, queue: &QueueName) -> Result<(), QakkaError> {
        if self.placement.is_local(queue) {
            return Ok(());
        }
        Err(QakkaError::NotQueueOwner {
            queue: queue.clone(),
            owner: self
                .placement
                .owner(queue)
                .unwrap_or("<nobody>")
                .to_string(),
        })
    }

    /// Stop all actors and the sweeper and refuse further operations.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.actors.shutdown_all();
        self.cancel.cancel();
        info!(region = %self.local_region(), "queue service shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_message::MemoryMessageStorage;
    use crate::storage::memory_queue::MemoryQueueStorage;
    use crate::storage::memory_shard::MemoryShardStorage;
    use crate::transport::InProcessTransport;

    struct Setup {
        service: Arc<QueueService>,
        shards: Arc<MemoryShardStorage>,
    }

    async fn setup(config: QakkaConfig) -> Setup {
        let shards = Arc::new(MemoryShardStorage::new());
        let service = QueueService::new(
            config,
            Arc::new(MemoryQueueStorage::new()),
            Arc::clone(&shards) as Arc<dyn ShardStorage>,
            Arc::new(MemoryMessageStorage::new()),
            Arc::new(InProcessTransport::new()),
            Arc::new(QueueMetrics::unregistered()),
        )
        .unwrap();
        Setup { service, shards }
    }

    #[tokio::test]
    async fn create_queue_bootstraps_shard_zero_of_both_kinds() {
        let s = setup(QakkaConfig::default()).await;
        let queue = Queue::new(QueueName::new("orders"), &QakkaConfig::default());
        s.service.create_queue(queue.clone()).await.unwrap();

        for kind in ShardKind::ALL {
            let shards = s
                .shards
                .list_shards(&queue.name, &queue.local_region, kind)
                .await
                .unwrap();
            assert_eq!(shards.len(), 1);
            assert_eq!(shards[0].shard_id, 0);
            assert_eq!(
                s.shards
                    .counter_value(&queue.name, &queue.local_region, kind, 0)
                    .await
                    .unwrap(),
                Some(0)
            );
        }
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let s = setup(QakkaConfig::default()).await;
        let queue = Queue::new(QueueName::new("orders"), &QakkaConfig::default());
        s.service.create_queue(queue.clone()).await.unwrap();
        let err = s.service.create_queue(queue).await.unwrap_err();
        assert!(matches!(err, QakkaError::QueueExists { .. }));
    }

    #[tokio::test]
    async fn send_to_unknown_queue_errors() {
        let s = setup(QakkaConfig::default()).await;
        let region = Region::new("us-east");
        let err = s
            .service
            .send_message_to_region(
                &QueueName::new("ghost"),
                &region,
                &region,
                Uuid::new_v4(),
                None,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QakkaError::QueueNotFound { .. }));
    }

    #[tokio::test]
    async fn get_next_on_unknown_queue_is_empty() {
        let s = setup(QakkaConfig::default()).await;
        let batch = s
            .service
            .get_next_messages(&QueueName::new("ghost"), 5)
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn non_owner_refuses_consumer_operations() {
        // Two members; find a queue owned by the other one.
        let config = QakkaConfig {
            members: vec!["qakka-1".to_string(), "qakka-2".to_string()],
            member_name: "qakka-1".to_string(),
            ..Default::default()
        };
        let placement = QueuePlacement::new(&config.members, "qakka-1");
        let foreign = (0..1000)
            .map(|i| QueueName::new(format!("queue-{i}")))
            .find(|q| !placement.is_local(q))
            .expect("some queue must hash to the other member");

        let s = setup(config).await;
        let err = s.service.get_next_messages(&foreign, 1).await.unwrap_err();
        assert!(matches!(err, QakkaError::NotQueueOwner { .. }));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_blocks_operations() {
        let s = setup(QakkaConfig::default()).await;
        s.service.shutdown();
        s.service.shutdown();
        assert!(s.service.is_shutdown());

        let err = s
            .service
            .create_queue(Queue::new(QueueName::new("q"), &QakkaConfig::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, QakkaError::ShuttingDown));
    }
}
