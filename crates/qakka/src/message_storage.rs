use async_trait::async_trait;
use uuid::Uuid;

use crate::error::QakkaError;
use crate::message::{MessageBody, QueueMessage};
use crate::time_uuid::TimeUuid;
use crate::types::{QueueName, Region};

/// Persistent storage for the two message column families — *available*
/// (DEFAULT) and *inflight* — and the payload bodies keyed by `message_id`.
///
/// Rows cluster ascending by `queueMessageId` within
/// (queue, region, shardId); reads honor that order. Deletes report whether
/// the row still existed, which is how the ack/sweeper race is resolved:
/// whoever's conditional delete returns the row owns the transition.
#[async_trait]
pub trait MessageStorage: Send + Sync {
    /// Write a row into the available family.
    async fn write_available(&self, message: &QueueMessage) -> Result<(), QakkaError>;

    /// Read up to `limit` available rows from one shard with
    /// `queueMessageId >= from` (all rows when `from` is `None`), ascending.
    async fn read_available(
        &self,
        queue: &QueueName,
        region: &Region,
        shard_id: i64,
        from: Option<TimeUuid>,
        limit: usize,
    ) -> Result<Vec<QueueMessage>, QakkaError>;

    /// Delete an available row. Returns whether it existed.
    async fn delete_available(
        &self,
        queue: &QueueName,
        region: &Region,
        shard_id: i64,
        queue_message_id: TimeUuid,
    ) -> Result<bool, QakkaError>;

    /// Write a row into the inflight family.
    async fn write_inflight(&self, message: &QueueMessage) -> Result<(), QakkaError>;

    /// Up to `limit` inflight rows for (queue, region), ascending by
    /// (shardId, queueMessageId). The sweeper's scan surface.
    async fn list_inflight(
        &self,
        queue: &QueueName,
        region: &Region,
        limit: usize,
    ) -> Result<Vec<QueueMessage>, QakkaError>;

    /// Conditionally delete an inflight row by id, returning it iff it still
    /// existed. `None` means someone else (ack vs. sweeper vs. nack) already
    /// took it, and the caller must not act on the message.
    async fn take_inflight(
        &self,
        queue: &QueueName,
        region: &Region,
        queue_message_id: TimeUuid,
    ) -> Result<Option<QueueMessage>, QakkaError>;

    /// How many rows (either family) currently reference `message_id`.
    /// Zero after an ack means the body can be reclaimed.
    async fn message_row_count(
        &self,
        queue: &QueueName,
        region: &Region,
        message_id: Uuid,
    ) -> Result<usize, QakkaError>;

    /// Delete every row of both families for (queue, region), returning the
    /// payload ids they referenced. Queue-delete cascade.
    async fn purge_queue(
        &self,
        queue: &QueueName,
        region: &Region,
    ) -> Result<Vec<Uuid>, QakkaError>;

    /// Write a payload body. Bodies are written before the index row.
    async fn write_body(&self, message_id: Uuid, body: &MessageBody) -> Result<(), QakkaError>;

    /// Load a payload body.
    async fn load_body(&self, message_id: Uuid) -> Result<Option<MessageBody>, QakkaError>;

    /// Delete a payload body. Returns whether it existed.
    async fn delete_body(&self, message_id: Uuid) -> Result<bool, QakkaError>;
}
