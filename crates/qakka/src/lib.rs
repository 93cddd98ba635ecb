//! Qakka: a distributed, multi-region, durably persisted message queue.
//!
//! Producers submit opaque payloads tagged to a named queue with an intended
//! delivery region; consumers pull batches in rough time order and must
//! acknowledge each delivered message or it is redelivered after its lease
//! expires. The backing store is a wide-column database used as a
//! shard-partitioned log (abstracted behind storage traits here), and a
//! single-writer actor per (queue, region) coordinates the hot path.

pub mod actor_registry;
pub mod buffer;
pub mod config;
pub mod error;
pub mod message;
pub mod message_storage;
pub mod metrics;
pub mod placement;
pub mod queue;
pub mod queue_actor;
pub mod queue_service;
pub mod queue_storage;
pub mod shard;
pub mod shard_allocator;
pub mod shard_storage;
pub mod storage;
pub mod sweeper;
pub mod testing;
pub mod time_uuid;
pub mod transport;
pub mod types;

/// Prelude module for convenient glob imports.
pub mod prelude {
    pub use crate::config::QakkaConfig;
    pub use crate::error::QakkaError;
    pub use crate::message::{MessageBody, QueueMessage};
    pub use crate::queue::Queue;
    pub use crate::queue_service::QueueService;
    pub use crate::shard::ShardKind;
    pub use crate::time_uuid::{TimeUuid, TimeUuidGenerator};
    pub use crate::types::{QueueName, Region};
}
