use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::QakkaError;
use crate::queue::Queue;
use crate::queue_storage::QueueStorage;
use crate::types::QueueName;

/// In-memory queue configuration storage.
#[derive(Default)]
pub struct MemoryQueueStorage {
    queues: Mutex<HashMap<QueueName, Queue>>,
}

impl MemoryQueueStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStorage for MemoryQueueStorage {
    async fn create_queue(&self, queue: &Queue) -> Result<(), QakkaError> {
        let mut queues = self.queues.lock();
        if queues.contains_key(&queue.name) {
            return Err(QakkaError::QueueExists {
                name: queue.name.clone(),
            });
        }
        queues.insert(queue.name.clone(), queue.clone());
        Ok(())
    }

    async fn get_queue(&self, name: &QueueName) -> Result<Option<Queue>, QakkaError> {
        Ok(self.queues.lock().get(name).cloned())
    }

    async fn all_queues(&self) -> Result<Vec<Queue>, QakkaError> {
        Ok(self.queues.lock().values().cloned().collect())
    }

    async fn delete_queue(&self, name: &QueueName) -> Result<(), QakkaError> {
        self.queues.lock().remove(name);
        Ok(())
    }
}
