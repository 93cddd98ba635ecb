use async_trait::async_trait;

use crate::error::QakkaError;
use crate::queue::Queue;
use crate::types::QueueName;

/// Persistent storage for queue configuration rows.
///
/// The wide-column driver behind this seam is an external collaborator;
/// the crate ships an in-memory implementation under [`crate::storage`].
#[async_trait]
pub trait QueueStorage: Send + Sync {
    /// Create a queue row. Fails with `QueueExists` if one is present.
    async fn create_queue(&self, queue: &Queue) -> Result<(), QakkaError>;

    /// Look up a queue row by name.
    async fn get_queue(&self, name: &QueueName) -> Result<Option<Queue>, QakkaError>;

    /// All queue rows, in no particular order.
    async fn all_queues(&self) -> Result<Vec<Queue>, QakkaError>;

    /// Delete a queue row. Deleting an absent queue is a no-op.
    async fn delete_queue(&self, name: &QueueName) -> Result<(), QakkaError>;
}
