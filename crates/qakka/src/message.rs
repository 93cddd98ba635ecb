use crate::shard::ShardKind;
use crate::time_uuid::TimeUuid;
use crate::types::{QueueName, Region};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One persisted delivery attempt of a message.
///
/// `message_id` identifies the payload and is stable across redeliveries;
/// `queue_message_id` identifies this attempt and is reminted on every
/// DEFAULT↔INFLIGHT transition. For any unacked `message_id` exactly one row
/// exists in DEFAULT or INFLIGHT, save for the short window during a
/// transition where both may exist — never neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub queue_message_id: TimeUuid,
    pub message_id: Uuid,
    pub queue: QueueName,
    pub region: Region,
    pub kind: ShardKind,
    pub shard_id: i64,
    pub queued_at: DateTime<Utc>,
    /// Set when the row enters INFLIGHT; the lease runs from here.
    pub inflight_at: Option<DateTime<Utc>>,
    /// Rows past this instant are discarded at refresh instead of delivered.
    pub expires_at: Option<DateTime<Utc>>,
    /// How many times this message has been returned for redelivery.
    pub n_returned: u32,
}

impl QueueMessage {
    /// A fresh available row for a newly produced message.
    pub fn available(
        queue_message_id: TimeUuid,
        message_id: Uuid,
        queue: QueueName,
        region: Region,
        shard_id: i64,
    ) -> Self {
        Self {
            queue_message_id,
            message_id,
            queue,
            region,
            kind: ShardKind::Default,
            shard_id,
            queued_at: Utc::now(),
            inflight_at: None,
            expires_at: None,
            n_returned: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Opaque payload of a message, written once before the index row, read by
/// `message_id`, and deleted after the final ack. Any higher-level object
/// mapping is the concern of consumer adapters, not the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub blob: Vec<u8>,
    pub content_type: String,
}

impl MessageBody {
    pub fn new(blob: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            blob,
            content_type: content_type.into(),
        }
    }
}
