use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::QakkaConfig;
use crate::error::QakkaError;
use crate::message_storage::MessageStorage;
use crate::metrics::QueueMetrics;
use crate::queue_actor::{QueueActor, QueueActorHandle};
use crate::queue_storage::QueueStorage;
use crate::shard_storage::ShardStorage;
use crate::time_uuid::TimeUuidGenerator;
use crate::types::QueueName;

/// Per-queue spawn lock to prevent double-spawn races: two concurrent
/// requests for a cold queue both miss the fast path; without serialization
/// both would spawn an actor, breaking the single-writer guarantee.
type SpawnLocks = DashMap<QueueName, Arc<tokio::sync::Mutex<()>>>;

/// Spawn-on-first-use registry of queue actors for the local region.
///
/// Holds at most one live actor per queue in this process; combined with the
/// cooperative queue→member placement, that gives at most one actor per
/// (queue, region) across the cluster.
pub struct ActorRegistry {
    config: Arc<QakkaConfig>,
    queues: Arc<dyn QueueStorage>,
    shards: Arc<dyn ShardStorage>,
    messages: Arc<dyn MessageStorage>,
    generator: Arc<TimeUuidGenerator>,
    metrics: Arc<QueueMetrics>,
    actors: DashMap<QueueName, QueueActorHandle>,
    spawn_locks: SpawnLocks,
    cancel: CancellationToken,
    closing: AtomicBool,
}

impl ActorRegistry {
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
            config,
            queues,
            shards,
            messages,
            generator,
            metrics,
            actors: DashMap::new(),
            spawn_locks: DashMap::new(),
            cancel,
            closing: AtomicBool::new(false),
        }
    }

    /// Handle to the actor for `name`, spawning it on first use.
    pub async fn get_or_spawn(&self, name: &QueueName) -> Result<QueueActorHandle, QakkaError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(QakkaError::ShuttingDown);
        }

        if let Some(handle) = self.live_handle(name) {
            return Ok(handle);
        }

        let lock = self
            .spawn_locks
            .entry(name.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // The loser of the spawn race uses the winner's actor.
        if let Some(handle) = self.live_handle(name) {
            return Ok(handle);
        }

        let queue = self
            .queues
            .get_queue(name)
            .await?
            .ok_or_else(|| QakkaError::QueueNotFound { name: name.clone() })?;

        debug!(queue = %name, "spawning queue actor");
        let handle = QueueActor::spawn(
            queue,
            Arc::clone(&self.config),
            Arc::clone(&self.shards),
            Arc::clone(&self.messages),
            Arc::clone(&self.generator),
            Arc::clone(&self.metrics),
            &self.cancel,
        );
        self.actors.insert(name.clone(), handle.clone());
        Ok(handle)
    }

    /// Handle to a running actor, if one exists.
    pub fn get(&self, name: &QueueName) -> Option<QueueActorHandle> {
        self.live_handle(name)
    }

    fn live_handle(&self, name: &QueueName) -> Option<QueueActorHandle> {
        self.actors
            .get(name)
            .filter(|h| !h.is_stopped())
            .map(|h| h.value().clone())
    }

    /// Names of all queues with a running actor.
    pub fn active_queues(&self) -> Vec<QueueName> {
        self.actors
            .iter()
            .filter(|entry| !entry.value().is_stopped())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Stop and forget the actor for `name` (queue delete).
    pub fn stop(&self, name: &QueueName) {
        if let Some((_, handle)) = self.actors.remove(name) {
            handle.stop();
        }
        self.spawn_locks.remove(name);
    }

    /// Stop every actor and refuse further spawns.
    pub fn shutdown_all(&self) {
        self.closing.store(true, Ordering::Release);
        for entry in self.actors.iter() {
            entry.value().stop();
        }
        self.actors.clear();
    }
}
