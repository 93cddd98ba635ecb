use crate::time_uuid::{TimeUuid, TimeUuidError};
use crate::types::{QueueName, Region};
use uuid::Uuid;

/// Errors that can occur in the queue system.
///
/// Lookup misses (`QueueNotFound`, `MessageNotFound`, `BodyNotFound`) are
/// often benign and mapped to empty results or no-ops at the facade.
/// `Storage` is transient and retryable; `InvalidConfig` is fatal.
#[derive(Debug, thiserror::Error)]
pub enum QakkaError {
    #[error("queue not found: {name}")]
    QueueNotFound { name: QueueName },

    #[error("queue already exists: {name}")]
    QueueExists { name: QueueName },

    #[error("queue {queue} is owned by cluster member {owner}, not this one")]
    NotQueueOwner { queue: QueueName, owner: String },

    #[error("no {kind} shard accepts message id {queue_message_id} for {queue}/{region}")]
    NoShardAvailable {
        queue: QueueName,
        region: Region,
        kind: crate::shard::ShardKind,
        queue_message_id: TimeUuid,
    },

    #[error("shard {shard_id} already exists for {queue}/{region}/{kind}")]
    ShardExists {
        queue: QueueName,
        region: Region,
        kind: crate::shard::ShardKind,
        shard_id: i64,
    },

    #[error("queue message not found: {queue_message_id}")]
    MessageNotFound { queue_message_id: TimeUuid },

    #[error("message body not found: {message_id}")]
    BodyNotFound { message_id: Uuid },

    #[error("no transport peer for region {region}")]
    RegionUnknown { region: Region },

    #[error("malformed envelope: {reason}")]
    MalformedEnvelope {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("storage error: {reason}")]
    Storage {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("queue service is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    ClockDriftExceeded(#[from] TimeUuidError),
}

impl QakkaError {
    /// Whether this error is a benign lookup miss rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            QakkaError::QueueNotFound { .. }
                | QakkaError::MessageNotFound { .. }
                | QakkaError::BodyNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = QakkaError::QueueNotFound {
            name: QueueName::new("orders"),
        };
        assert_eq!(err.to_string(), "queue not found: orders");

        let err = QakkaError::InvalidConfig {
            reason: "refresh_batch must be >= 1".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration: refresh_batch must be >= 1"
        );
    }

    #[test]
    fn not_found_classification() {
        assert!(QakkaError::QueueNotFound {
            name: QueueName::new("q")
        }
        .is_not_found());
        assert!(!QakkaError::ShuttingDown.is_not_found());
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<QakkaError>();
    }
}
