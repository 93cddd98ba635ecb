use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::QakkaError;
use crate::message::{MessageBody, QueueMessage};
use crate::message_storage::MessageStorage;
use crate::time_uuid::TimeUuid;
use crate::types::{QueueName, Region};

type RowKey = (QueueName, Region, i64, TimeUuid);

/// Body store shared between regions, standing in for the multi-DC
/// replication the real payload table gets from the database.
pub type SharedBodies = Arc<Mutex<HashMap<Uuid, MessageBody>>>;

/// In-memory message row and body storage.
///
/// Both column families are BTreeMaps keyed by
/// (queue, region, shardId, queueMessageId), so range reads come back in the
/// store's clustering order.
pub struct MemoryMessageStorage {
    inner: Mutex<Inner>,
    bodies: SharedBodies,
}

#[derive(Default)]
struct Inner {
    available: BTreeMap<RowKey, QueueMessage>,
    inflight: BTreeMap<RowKey, QueueMessage>,
}

impl MemoryMessageStorage {
    pub fn new() -> Self {
        Self::with_bodies(Arc::new(Mutex::new(HashMap::new())))
    }

    /// Share one body map between several regions' stores.
    pub fn with_bodies(bodies: SharedBodies) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            bodies,
        }
    }

    pub fn shared_bodies(&self) -> SharedBodies {
        Arc::clone(&self.bodies)
    }

    fn key(message: &QueueMessage) -> RowKey {
        (
            message.queue.clone(),
            message.region.clone(),
            message.shard_id,
            message.queue_message_id,
        )
    }
}

impl Default for MemoryMessageStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStorage for MemoryMessageStorage {
    async fn write_available(&self, message: &QueueMessage) -> Result<(), QakkaError> {
        let mut inner = self.inner.lock();
        inner.available.insert(Self::key(message), message.clone());
        Ok(())
    }

    async fn read_available(
        &self,
        queue: &QueueName,
        region: &Region,
        shard_id: i64,
        from: Option<TimeUuid>,
        limit: usize,
    ) -> Result<Vec<QueueMessage>, QakkaError> {
        let inner = self.inner.lock();
        let lo = (
            queue.clone(),
            region.clone(),
            shard_id,
            from.unwrap_or_else(TimeUuid::min),
        );
        let hi = (queue.clone(), region.clone(), shard_id, TimeUuid::max());
        Ok(inner
            .available
            .range(lo..=hi)
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn delete_available(
        &self,
        queue: &QueueName,
        region: &Region,
        shard_id: i64,
        queue_message_id: TimeUuid,
    ) -> Result<bool, QakkaError> {
        let key = (queue.clone(), region.clone(), shard_id, queue_message_id);
        Ok(self.inner.lock().available.remove(&key).is_some())
    }

    async fn write_inflight(&self, message: &QueueMessage) -> Result<(), QakkaError> {
        let mut inner = self.inner.lock();
        inner.inflight.insert(Self::key(message), message.clone());
        Ok(())
    }

    async fn list_inflight(
        &self,
        queue: &QueueName,
        region: &Region,
        limit: usize,
    ) -> Result<Vec<QueueMessage>, QakkaError> {
        let inner = self.inner.lock();
        Ok(inner
            .inflight
            .iter()
            .filter(|((q, r, _, _), _)| q == queue && r == region)
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn take_inflight(
        &self,
        queue: &QueueName,
        region: &Region,
        queue_message_id: TimeUuid,
    ) -> Result<Option<QueueMessage>, QakkaError> {
        let mut inner = self.inner.lock();
        let key = inner
            .inflight
            .iter()
            .find(|((q, r, _, qmid), _)| q == queue && r == region && *qmid == queue_message_id)
            .map(|(k, _)| k.clone());
        Ok(key.and_then(|k| inner.inflight.remove(&k)))
    }

    async fn message_row_count(
        &self,
        queue: &QueueName,
        region: &Region,
        message_id: Uuid,
    ) -> Result<usize, QakkaError> {
        let inner = self.inner.lock();
        let matches = |(q, r, _, _): &RowKey, m: &QueueMessage| {
            q == queue && r == region && m.message_id == message_id
        };
        Ok(inner.available.iter().filter(|&(k, m)| matches(k, m)).count()
            + inner.inflight.iter().filter(|&(k, m)| matches(k, m)).count())
    }

    async fn purge_queue(
        &self,
        queue: &QueueName,
        region: &Region,
    ) -> Result<Vec<Uuid>, QakkaError> {
        let mut inner = self.inner.lock();
        let Inner {
            available,
            inflight,
        } = &mut *inner;
        let mut message_ids = Vec::new();
        for family in [available, inflight] {
            family.retain(|(q, r, _, _), m| {
                if q == queue && r == region {
                    message_ids.push(m.message_id);
                    false
                } else {
                    true
                }
            });
        }
        message_ids.sort_unstable();
        message_ids.dedup();
        Ok(message_ids)
    }

    async fn write_body(&self, message_id: Uuid, body: &MessageBody) -> Result<(), QakkaError> {
        self.bodies.lock().insert(message_id, body.clone());
        Ok(())
    }

    async fn load_body(&self, message_id: Uuid) -> Result<Option<MessageBody>, QakkaError> {
        Ok(self.bodies.lock().get(&message_id).cloned())
    }

    async fn delete_body(&self, message_id: Uuid) -> Result<bool, QakkaError> {
        Ok(self.bodies.lock().remove(&message_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ShardKind;
    use crate::time_uuid::TimeUuidGenerator;

    fn queue() -> QueueName {
        QueueName::new("orders")
    }

    fn region() -> Region {
        Region::new("us-east")
    }

    fn row(gen: &TimeUuidGenerator, shard_id: i64) -> QueueMessage {
        QueueMessage::available(
            gen.next().unwrap(),
            Uuid::new_v4(),
            queue(),
            region(),
            shard_id,
        )
    }

    #[tokio::test]
    async fn read_available_is_time_ordered() {
        let storage = MemoryMessageStorage::new();
        let gen = TimeUuidGenerator::new();

        let rows: Vec<QueueMessage> = (0..5).map(|_| row(&gen, 0)).collect();
        // Insert out of order.
        for m in rows.iter().rev() {
            storage.write_available(m).await.unwrap();
        }

        let read = storage
            .read_available(&queue(), &region(), 0, None, 10)
            .await
            .unwrap();
        assert_eq!(read, rows);
    }

    #[tokio::test]
    async fn read_available_honors_cursor_and_limit() {
        let storage = MemoryMessageStorage::new();
        let gen = TimeUuidGenerator::new();
        let rows: Vec<QueueMessage> = (0..5).map(|_| row(&gen, 0)).collect();
        for m in &rows {
            storage.write_available(m).await.unwrap();
        }

        let read = storage
            .read_available(&queue(), &region(), 0, Some(rows[2].queue_message_id), 10)
            .await
            .unwrap();
        assert_eq!(read, rows[2..].to_vec());

        let read = storage
            .read_available(&queue(), &region(), 0, None, 2)
            .await
            .unwrap();
        assert_eq!(read, rows[..2].to_vec());
    }

    #[tokio::test]
    async fn shards_are_isolated() {
        let storage = MemoryMessageStorage::new();
        let gen = TimeUuidGenerator::new();
        storage.write_available(&row(&gen, 0)).await.unwrap();
        storage.write_available(&row(&gen, 1)).await.unwrap();

        let shard0 = storage
            .read_available(&queue(), &region(), 0, None, 10)
            .await
            .unwrap();
        assert_eq!(shard0.len(), 1);
    }

    #[tokio::test]
    async fn take_inflight_is_conditional() {
        let storage = MemoryMessageStorage::new();
        let gen = TimeUuidGenerator::new();
        let mut m = row(&gen, 0);
        m.kind = ShardKind::Inflight;
        storage.write_inflight(&m).await.unwrap();

        let first = storage
            .take_inflight(&queue(), &region(), m.queue_message_id)
            .await
            .unwrap();
        assert_eq!(first, Some(m.clone()));

        // Second taker loses the race.
        let second = storage
            .take_inflight(&queue(), &region(), m.queue_message_id)
            .await
            .unwrap();
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn message_row_count_spans_both_families() {
        let storage = MemoryMessageStorage::new();
        let gen = TimeUuidGenerator::new();
        let available = row(&gen, 0);
        let mut inflight = available.clone();
        inflight.queue_message_id = gen.next().unwrap();
        inflight.kind = ShardKind::Inflight;

        storage.write_available(&available).await.unwrap();
        storage.write_inflight(&inflight).await.unwrap();

        assert_eq!(
            storage
                .message_row_count(&queue(), &region(), available.message_id)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn purge_returns_referenced_payload_ids() {
        let storage = MemoryMessageStorage::new();
        let gen = TimeUuidGenerator::new();
        let a = row(&gen, 0);
        let mut b = row(&gen, 0);
        b.kind = ShardKind::Inflight;
        storage.write_available(&a).await.unwrap();
        storage.write_inflight(&b).await.unwrap();

        let ids = storage.purge_queue(&queue(), &region()).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a.message_id));
        assert!(ids.contains(&b.message_id));
        assert!(storage
            .read_available(&queue(), &region(), 0, None, 10)
            .await
            .unwrap()
            .is_empty());
        assert!(storage
            .list_inflight(&queue(), &region(), 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn bodies_round_trip_and_share() {
        let storage = MemoryMessageStorage::new();
        let peer = MemoryMessageStorage::with_bodies(storage.shared_bodies());

        let id = Uuid::new_v4();
        let body = MessageBody::new(b"my test data".to_vec(), "text/plain");
        storage.write_body(id, &body).await.unwrap();

        // Visible through the peer store sharing the body map.
        assert_eq!(peer.load_body(id).await.unwrap(), Some(body));

        assert!(storage.delete_body(id).await.unwrap());
        assert!(!storage.delete_body(id).await.unwrap());
        assert_eq!(peer.load_body(id).await.unwrap(), None);
    }
}
