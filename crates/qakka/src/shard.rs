use crate::time_uuid::TimeUuid;
use crate::types::{QueueName, Region};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which of the two message column families a shard partitions.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ShardKind {
    /// Messages available for delivery.
    Default,
    /// Messages delivered and awaiting acknowledgement.
    Inflight,
}

impl ShardKind {
    pub const ALL: [ShardKind; 2] = [ShardKind::Default, ShardKind::Inflight];
}

impl fmt::Display for ShardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardKind::Default => write!(f, "default"),
            ShardKind::Inflight => write!(f, "inflight"),
        }
    }
}

/// A time-bounded partition of a queue's message stream.
///
/// Shard ids are dense and strictly increasing per (queue, region, kind);
/// pivots increase with them. A message belongs to the highest-shardId shard
/// whose pivot is ≤ its `queueMessageId` — new shards are cut with a pivot
/// slightly in the future so producers never race into an empty shard.
/// Shards are created by the allocator, never mutated, and deleted only when
/// their queue is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub queue: QueueName,
    pub region: Region,
    pub kind: ShardKind,
    pub shard_id: i64,
    pub pivot: TimeUuid,
}

impl Shard {
    pub fn new(
        queue: QueueName,
        region: Region,
        kind: ShardKind,
        shard_id: i64,
        pivot: TimeUuid,
    ) -> Self {
        Self {
            queue,
            region,
            kind,
            shard_id,
            pivot,
        }
    }

    /// The bootstrap shard cut at queue-create time. Its pivot is the epoch
    /// boundary so every routable message id falls at or after it.
    pub fn zero(queue: QueueName, region: Region, kind: ShardKind) -> Self {
        Self::new(queue, region, kind, 0, TimeUuid::min())
    }
}

/// Route a message id to its shard: the last shard (highest shardId) in
/// pivot-ascending order whose pivot is ≤ the id. `shards` must be sorted
/// ascending as [`ShardStorage::list_shards`](crate::shard_storage::ShardStorage::list_shards)
/// returns them.
pub fn shard_for(shards: &[Shard], queue_message_id: TimeUuid) -> Option<&Shard> {
    shards.iter().rev().find(|s| s.pivot <= queue_message_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_uuid::TimeUuidGenerator;

    fn shard(id: i64, pivot: TimeUuid) -> Shard {
        Shard::new(
            QueueName::new("orders"),
            Region::new("us-east"),
            ShardKind::Default,
            id,
            pivot,
        )
    }

    #[test]
    fn routes_to_highest_shard_at_or_below_id() {
        let shards = vec![
            shard(0, TimeUuid::min()),
            shard(1, TimeUuid::start_of(1_000)),
            shard(2, TimeUuid::start_of(2_000)),
        ];

        let id = TimeUuid::start_of(1_500);
        assert_eq!(shard_for(&shards, id).unwrap().shard_id, 1);

        let id = TimeUuid::start_of(2_000);
        assert_eq!(shard_for(&shards, id).unwrap().shard_id, 2);

        let id = TimeUuid::start_of(10);
        assert_eq!(shard_for(&shards, id).unwrap().shard_id, 0);
    }

    #[test]
    fn future_shard_not_selected_for_present_message() {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let shards = vec![
            shard(0, TimeUuid::min()),
            shard(1, TimeUuid::start_of(now_ms + 60_000)),
        ];
        let id = TimeUuidGenerator::new().next().unwrap();
        assert_eq!(shard_for(&shards, id).unwrap().shard_id, 0);
    }

    #[test]
    fn no_shard_when_id_precedes_all_pivots() {
        let shards = vec![shard(3, TimeUuid::start_of(5_000))];
        assert!(shard_for(&shards, TimeUuid::start_of(1_000)).is_none());
    }

    #[test]
    fn zero_shard_accepts_any_generated_id() {
        let zero = Shard::zero(
            QueueName::new("orders"),
            Region::new("us-east"),
            ShardKind::Default,
        );
        let shards = vec![zero];
        let id = TimeUuidGenerator::new().next().unwrap();
        assert_eq!(shard_for(&shards, id).unwrap().shard_id, 0);
    }

    #[test]
    fn serde_round_trip() {
        let s = shard(1, TimeUuid::start_of(1_000));
        let bytes = rmp_serde::to_vec(&s).unwrap();
        let decoded: Shard = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(s, decoded);
    }
}
