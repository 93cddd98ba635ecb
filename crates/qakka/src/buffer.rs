use std::collections::VecDeque;

use crate::message::QueueMessage;

/// Bounded in-memory FIFO of inflight descriptors for one (queue, region).
///
/// Mutated only by the owning queue actor, so it carries no locking. It
/// exists to amortize storage reads across many small `get_next` calls;
/// its size counts only descriptors loaded here, not rows that are merely
/// durable in the inflight family.
#[derive(Debug)]
pub struct QueueBuffer {
    items: VecDeque<QueueMessage>,
    capacity: usize,
}

impl QueueBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append one descriptor. Returns false (and drops nothing — the caller
    /// keeps the descriptor) when the buffer is at capacity.
    pub fn append(&mut self, message: QueueMessage) -> bool {
        if self.items.len() >= self.capacity {
            return false;
        }
        self.items.push_back(message);
        true
    }

    /// Put descriptors back at the head, preserving their order. Used when a
    /// consumer abandons a reply before it is delivered.
    pub fn push_front_batch(&mut self, batch: Vec<QueueMessage>) {
        for message in batch.into_iter().rev() {
            self.items.push_front(message);
        }
    }

    /// Remove and return up to `n` descriptors from the head.
    pub fn poll_up_to(&mut self, n: usize) -> Vec<QueueMessage> {
        let take = n.min(self.items.len());
        self.items.drain(..take).collect()
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_uuid::TimeUuidGenerator;
    use crate::types::{QueueName, Region};
    use uuid::Uuid;

    fn message(gen: &TimeUuidGenerator) -> QueueMessage {
        QueueMessage::available(
            gen.next().unwrap(),
            Uuid::new_v4(),
            QueueName::new("orders"),
            Region::new("us-east"),
            0,
        )
    }

    #[test]
    fn fifo_order() {
        let gen = TimeUuidGenerator::new();
        let mut buffer = QueueBuffer::new(10);
        let a = message(&gen);
        let b = message(&gen);
        assert!(buffer.append(a.clone()));
        assert!(buffer.append(b.clone()));

        assert_eq!(buffer.poll_up_to(1), vec![a]);
        assert_eq!(buffer.poll_up_to(5), vec![b]);
        assert_eq!(buffer.size(), 0);
    }

    #[test]
    fn poll_returns_at_most_what_is_buffered() {
        let gen = TimeUuidGenerator::new();
        let mut buffer = QueueBuffer::new(10);
        buffer.append(message(&gen));
        assert_eq!(buffer.poll_up_to(25).len(), 1);
        assert!(buffer.poll_up_to(25).is_empty());
    }

    #[test]
    fn append_rejects_past_capacity() {
        let gen = TimeUuidGenerator::new();
        let mut buffer = QueueBuffer::new(2);
        assert!(buffer.append(message(&gen)));
        assert!(buffer.append(message(&gen)));
        assert!(!buffer.append(message(&gen)));
        assert!(buffer.is_full());
        assert_eq!(buffer.size(), 2);
        assert_eq!(buffer.remaining_capacity(), 0);
    }

    #[test]
    fn push_front_preserves_order() {
        let gen = TimeUuidGenerator::new();
        let mut buffer = QueueBuffer::new(10);
        let a = message(&gen);
        let b = message(&gen);
        let c = message(&gen);
        buffer.append(c.clone());

        buffer.push_front_batch(vec![a.clone(), b.clone()]);
        assert_eq!(buffer.poll_up_to(3), vec![a, b, c]);
    }
}
