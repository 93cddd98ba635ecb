use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Queue-system prometheus metrics.
pub struct QueueMetrics {
    /// Messages accepted by the local region (index row written).
    pub messages_sent: IntCounter,
    /// Descriptors handed to consumers by `get_next`.
    pub messages_delivered: IntCounter,
    /// Inflight rows removed by acknowledgement.
    pub messages_acked: IntCounter,
    /// Inflight rows returned to available by an explicit nack.
    pub messages_nacked: IntCounter,
    /// Inflight rows returned to available by lease expiry.
    pub messages_redelivered: IntCounter,
    /// Messages dropped after exceeding their redelivery cap.
    pub dead_letters: IntCounter,
    /// Available rows discarded at refresh because they had expired.
    pub messages_expired: IntCounter,
    /// Shards created by the allocator (excludes shard-0 bootstraps).
    pub shards_allocated: IntCounter,
    /// Queue actors currently running in this process.
    pub active_actors: IntGauge,
    /// Descriptors currently held across all in-memory buffers.
    pub buffered_messages: IntGauge,
}

impl QueueMetrics {
    /// Create metrics and register them with the given prometheus registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let messages_sent = IntCounter::with_opts(Opts::new(
            "qakka_messages_sent_total",
            "Messages accepted by the local region",
        ))?;
        let messages_delivered = IntCounter::with_opts(Opts::new(
            "qakka_messages_delivered_total",
            "Descriptors handed to consumers",
        ))?;
        let messages_acked = IntCounter::with_opts(Opts::new(
            "qakka_messages_acked_total",
            "Inflight rows removed by acknowledgement",
        ))?;
        let messages_nacked = IntCounter::with_opts(Opts::new(
            "qakka_messages_nacked_total",
            "Inflight rows returned to available by an explicit nack",
        ))?;
        let messages_redelivered = IntCounter::with_opts(Opts::new(
            "qakka_messages_redelivered_total",
            "Inflight rows returned to available by lease expiry",
        ))?;
        let dead_letters = IntCounter::with_opts(Opts::new(
            "qakka_dead_letters_total",
            "Messages dropped after exceeding their redelivery cap",
        ))?;
        let messages_expired = IntCounter::with_opts(Opts::new(
            "qakka_messages_expired_total",
            "Available rows discarded at refresh because they had expired",
        ))?;
        let shards_allocated = IntCounter::with_opts(Opts::new(
            "qakka_shards_allocated_total",
            "Shards created by the allocator",
        ))?;
        let active_actors = IntGauge::with_opts(Opts::new(
            "qakka_active_actors",
            "Queue actors currently running in this process",
        ))?;
        let buffered_messages = IntGauge::with_opts(Opts::new(
            "qakka_buffered_messages",
            "Descriptors currently held across all in-memory buffers",
        ))?;

        registry.register(Box::new(messages_sent.clone()))?;
        registry.register(Box::new(messages_delivered.clone()))?;
        registry.register(Box::new(messages_acked.clone()))?;
        registry.register(Box::new(messages_nacked.clone()))?;
        registry.register(Box::new(messages_redelivered.clone()))?;
        registry.register(Box::new(dead_letters.clone()))?;
        registry.register(Box::new(messages_expired.clone()))?;
        registry.register(Box::new(shards_allocated.clone()))?;
        registry.register(Box::new(active_actors.clone()))?;
        registry.register(Box::new(buffered_messages.clone()))?;

        Ok(Self {
            messages_sent,
            messages_delivered,
            messages_acked,
            messages_nacked,
            messages_redelivered,
            dead_letters,
            messages_expired,
            shards_allocated,
            active_actors,
            buffered_messages,
        })
    }

    /// Create metrics without registering (for testing).
    pub fn unregistered() -> Self {
        Self {
            messages_sent: IntCounter::new("qakka_messages_sent_total", "sent")
                .expect("valid metric name"),
            messages_delivered: IntCounter::new("qakka_messages_delivered_total", "delivered")
                .expect("valid metric name"),
            messages_acked: IntCounter::new("qakka_messages_acked_total", "acked")
                .expect("valid metric name"),
            messages_nacked: IntCounter::new("qakka_messages_nacked_total", "nacked")
                .expect("valid metric name"),
            messages_redelivered: IntCounter::new("qakka_messages_redelivered_total", "redelivered")
                .expect("valid metric name"),
            dead_letters: IntCounter::new("qakka_dead_letters_total", "dead letters")
                .expect("valid metric name"),
            messages_expired: IntCounter::new("qakka_messages_expired_total", "expired")
                .expect("valid metric name"),
            shards_allocated: IntCounter::new("qakka_shards_allocated_total", "allocated")
                .expect("valid metric name"),
            active_actors: IntGauge::new("qakka_active_actors", "actors")
                .expect("valid metric name"),
            buffered_messages: IntGauge::new("qakka_buffered_messages", "buffered")
                .expect("valid metric name"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_metrics_work() {
        let m = QueueMetrics::unregistered();
        m.messages_sent.inc();
        assert_eq!(m.messages_sent.get(), 1);
        m.buffered_messages.set(42);
        assert_eq!(m.buffered_messages.get(), 42);
    }

    #[test]
    fn registered_metrics_work() {
        let r = Registry::new();
        let m = QueueMetrics::new(&r).unwrap();
        m.dead_letters.inc();
        assert_eq!(m.dead_letters.get(), 1);
        assert!(!r.gather().is_empty());
    }
}
