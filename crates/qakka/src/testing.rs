//! In-memory single-process harness for unit and integration testing.
//!
//! Wires a [`QueueService`] per region over in-memory storage and the
//! in-process transport, with tick intervals short enough for tests to
//! observe refresh, sweep, and allocation behavior in real time.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::QakkaConfig;
use crate::error::QakkaError;
use crate::message::MessageBody;
use crate::metrics::QueueMetrics;
use crate::queue::Queue;
use crate::queue_service::QueueService;
use crate::storage::memory_message::{MemoryMessageStorage, SharedBodies};
use crate::storage::memory_queue::MemoryQueueStorage;
use crate::storage::memory_shard::MemoryShardStorage;
use crate::transport::InProcessTransport;
use crate::types::{QueueName, Region};

/// A single-region in-memory queue service for testing.
pub struct TestQueueService {
    pub service: Arc<QueueService>,
    pub config: QakkaConfig,
    pub queues: Arc<MemoryQueueStorage>,
    pub shards: Arc<MemoryShardStorage>,
    pub messages: Arc<MemoryMessageStorage>,
    pub metrics: Arc<QueueMetrics>,
}

impl TestQueueService {
    /// Default fast-tick single-region harness.
    pub fn new() -> Self {
        Self::with_config(Self::fast_config("us-east"))
    }

    /// Configuration with tick intervals suited to tests: actors refresh
    /// every 50ms, the sweeper runs every 100ms, leases default to 1s.
    pub fn fast_config(region: &str) -> QakkaConfig {
        QakkaConfig {
            local_region: Region::new(region),
            lease: Duration::from_secs(1),
            refresh_interval: Duration::from_millis(50),
            shard_check_interval: Duration::from_millis(50),
            sweeper_interval: Duration::from_millis(100),
            get_next_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    pub fn with_config(config: QakkaConfig) -> Self {
        let transport = Arc::new(InProcessTransport::new());
        let harness = Self::with_parts(config, transport.clone(), None);
        transport.register(
            harness.config.local_region.clone(),
            Arc::clone(&harness.service),
        );
        harness
    }

    /// One service per region, connected over an in-process transport. The
    /// body store is shared between regions, standing in for the database's
    /// multi-DC replication of the payload table.
    pub fn multi_region(regions: &[&str]) -> Vec<Self> {
        let transport = Arc::new(InProcessTransport::new());
        let mut harnesses: Vec<Self> = Vec::new();
        for region in regions {
            let shared = harnesses.first().map(|h| h.messages.shared_bodies());
            let harness = Self::with_parts(Self::fast_config(region), transport.clone(), shared);
            transport.register(
                harness.config.local_region.clone(),
                Arc::clone(&harness.service),
            );
            harnesses.push(harness);
        }
        harnesses
    }

    fn with_parts(
        config: QakkaConfig,
        transport: Arc<InProcessTransport>,
        bodies: Option<SharedBodies>,
    ) -> Self {
        let queues = Arc::new(MemoryQueueStorage::new());
        let shards = Arc::new(MemoryShardStorage::new());
        let messages = Arc::new(match bodies {
            Some(shared) => MemoryMessageStorage::with_bodies(shared),
            None => MemoryMessageStorage::new(),
        });
        let metrics = Arc::new(QueueMetrics::unregistered());

        let service = QueueService::new(
            config.clone(),
            Arc::clone(&queues) as Arc<dyn crate::queue_storage::QueueStorage>,
            Arc::clone(&shards) as Arc<dyn crate::shard_storage::ShardStorage>,
            Arc::clone(&messages) as Arc<dyn crate::message_storage::MessageStorage>,
            transport,
            Arc::clone(&metrics),
        )
        .expect("test config should be valid");

        Self {
            service,
            config,
            queues,
            shards,
            messages,
            metrics,
        }
    }

    /// Create a queue with the harness defaults (1s lease).
    pub async fn create_queue(&self, name: &str) -> Result<Queue, QakkaError> {
        self.create_queue_with(name, self.config.lease.as_secs(), self.config.max_redeliveries)
            .await
    }

    /// Create a queue with an explicit lease and redelivery cap.
    pub async fn create_queue_with(
        &self,
        name: &str,
        lease_seconds: u64,
        max_redeliveries: u32,
    ) -> Result<Queue, QakkaError> {
        let mut queue = Queue::new(QueueName::new(name), &self.config);
        queue.lease_seconds = lease_seconds;
        queue.max_redeliveries = max_redeliveries;
        self.service.create_queue(queue.clone()).await?;
        Ok(queue)
    }

    /// Producer helper: write a text body and send it locally.
    pub async fn send_text(&self, queue: &QueueName, text: &str) -> Result<Uuid, QakkaError> {
        let message_id = Uuid::new_v4();
        self.service
            .write_message_data(
                message_id,
                &MessageBody::new(text.as_bytes().to_vec(), "text/plain"),
            )
            .await?;
        let region = self.config.local_region.clone();
        self.service
            .send_message_to_region(queue, &region, &region, message_id, None, None)
            .await?;
        Ok(message_id)
    }

    /// Poll until the queue's in-memory buffer holds at least `expected`
    /// descriptors, nudging a refresh each round. Panics after `max_retries`.
    pub async fn refresh_until_buffered(
        &self,
        queue: &QueueName,
        expected: usize,
        max_retries: usize,
        poll_interval: Duration,
    ) -> usize {
        let mut retries = 0;
        loop {
            self.service.refresh().await;
            tokio::time::sleep(poll_interval).await;
            let size = self
                .service
                .buffer_size(queue)
                .await
                .expect("buffer size should be readable");
            if size >= expected {
                return size;
            }
            retries += 1;
            if retries >= max_retries {
                panic!("buffer held {size} after {max_retries} retries, wanted {expected}");
            }
        }
    }
}

impl Default for TestQueueService {
    fn default() -> Self {
        Self::new()
    }
}
