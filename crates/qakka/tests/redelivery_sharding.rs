//! Lease expiry, redelivery, dead-lettering, and shard rollover.

use std::time::Duration;

use qakka::config::QakkaConfig;
use qakka::message::QueueMessage;
use qakka::shard::ShardKind;
use qakka::shard_storage::ShardStorage;
use qakka::testing::TestQueueService;
use qakka::types::{QueueName, Region};

async fn get_one_within(
    harness: &TestQueueService,
    queue: &QueueName,
    deadline: Duration,
) -> Option<QueueMessage> {
    let rounds = (deadline.as_millis() / 100).max(1);
    for _ in 0..rounds {
        harness.service.refresh().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut batch = harness.service.get_next_messages(queue, 1).await.unwrap();
        if let Some(message) = batch.pop() {
            return Some(message);
        }
    }
    None
}

#[tokio::test]
async fn unacked_message_is_redelivered_after_the_lease() {
    let harness = TestQueueService::new();
    let queue = harness.create_queue_with("orders", 1, 10).await.unwrap();

    let message_id = harness.send_text(&queue.name, "retry me").await.unwrap();

    let first = get_one_within(&harness, &queue.name, Duration::from_secs(3))
        .await
        .expect("first delivery");
    assert_eq!(first.message_id, message_id);
    assert_eq!(first.n_returned, 0);

    // Do not ack; the lease expires and the sweeper returns it.
    let second = get_one_within(&harness, &queue.name, Duration::from_secs(5))
        .await
        .expect("redelivery");
    assert_eq!(second.message_id, first.message_id);
    assert_ne!(second.queue_message_id, first.queue_message_id);
    assert_eq!(second.n_returned, 1);
    assert!(harness.metrics.messages_redelivered.get() >= 1);

    harness.service.shutdown();
}

#[tokio::test]
async fn delivered_message_is_not_redelivered_before_the_lease() {
    let harness = TestQueueService::new();
    let queue = harness.create_queue_with("orders", 4, 10).await.unwrap();

    harness.send_text(&queue.name, "hold me").await.unwrap();
    let first = get_one_within(&harness, &queue.name, Duration::from_secs(3))
        .await
        .expect("first delivery");

    // Well inside the lease the message must not come back.
    let early = get_one_within(&harness, &queue.name, Duration::from_secs(2)).await;
    assert!(
        early.is_none(),
        "descriptor for {} returned again before its lease expired",
        first.message_id
    );

    harness.service.shutdown();
}

#[tokio::test]
async fn nack_returns_the_message_without_waiting_for_the_lease() {
    let harness = TestQueueService::new();
    let queue = harness.create_queue_with("orders", 300, 10).await.unwrap();

    let message_id = harness.send_text(&queue.name, "again").await.unwrap();
    let first = get_one_within(&harness, &queue.name, Duration::from_secs(3))
        .await
        .expect("first delivery");

    harness
        .service
        .nack_message(&queue.name, first.queue_message_id)
        .await
        .unwrap();

    let second = get_one_within(&harness, &queue.name, Duration::from_secs(3))
        .await
        .expect("redelivery after nack");
    assert_eq!(second.message_id, message_id);
    assert_ne!(second.queue_message_id, first.queue_message_id);
    assert_eq!(second.n_returned, 1);

    harness.service.shutdown();
}

#[tokio::test]
async fn message_is_dead_lettered_after_the_redelivery_cap() {
    let harness = TestQueueService::new();
    let queue = harness.create_queue_with("orders", 1, 2).await.unwrap();

    let message_id = harness.send_text(&queue.name, "doomed").await.unwrap();

    // Three deliveries (n_returned 0, 1, 2), none acked. The third lease
    // expiry exceeds max_redeliveries = 2.
    for expected_returns in 0..3 {
        let delivered = get_one_within(&harness, &queue.name, Duration::from_secs(5))
            .await
            .expect("delivery attempt");
        assert_eq!(delivered.message_id, message_id);
        assert_eq!(delivered.n_returned, expected_returns);
    }

    // Wait for the final expiry to dead-letter it.
    for _ in 0..60 {
        if harness.metrics.dead_letters.get() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(harness.metrics.dead_letters.get(), 1);

    assert!(
        get_one_within(&harness, &queue.name, Duration::from_secs(2))
            .await
            .is_none(),
        "dead-lettered message must not be delivered again"
    );
    assert!(harness
        .service
        .load_message_data(message_id)
        .await
        .unwrap()
        .is_none());

    harness.service.shutdown();
}

#[tokio::test]
async fn unacked_messages_drain_within_the_redelivery_budget() {
    let harness = TestQueueService::new();
    let queue = harness.create_queue_with("orders", 1, 1).await.unwrap();

    for _ in 0..3 {
        harness.send_text(&queue.name, "drain").await.unwrap();
    }

    // Never ack anything: every message must reach the dead-letter terminal
    // state within maxRedeliveries + 1 lease cycles.
    for _ in 0..150 {
        harness.service.refresh().await;
        if harness.metrics.dead_letters.get() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(harness.metrics.dead_letters.get(), 3);
    assert_eq!(harness.service.queue_depth(&queue.name).await.unwrap(), 0);

    harness.service.shutdown();
}

/// Configuration for allocator tests: the actor's own timers are parked so
/// refreshes cannot drain counters underneath the assertions.
fn allocator_config(max_shard_size: i64, advance: Duration) -> QakkaConfig {
    QakkaConfig {
        local_region: Region::new("us-east"),
        max_shard_size,
        shard_allocation_advance: advance,
        refresh_interval: Duration::from_secs(3600),
        shard_check_interval: Duration::from_secs(3600),
        sweeper_interval: Duration::from_secs(3600),
        ..Default::default()
    }
}

async fn default_shard_ids(harness: &TestQueueService, queue: &QueueName) -> Vec<i64> {
    harness
        .shards
        .list_shards(queue, &harness.config.local_region, ShardKind::Default)
        .await
        .unwrap()
        .iter()
        .map(|s| s.shard_id)
        .collect()
}

#[tokio::test]
async fn shard_rollover_allocates_only_past_the_threshold() {
    let harness =
        TestQueueService::with_config(allocator_config(100, Duration::from_secs(30)));
    let queue = harness.create_queue_with("orders", 300, 10).await.unwrap();

    // 90 rows: counter == 0.9 × max, not past it — no new shard.
    for _ in 0..90 {
        harness.send_text(&queue.name, "fill").await.unwrap();
    }
    harness.service.check_shards(&queue.name).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(default_shard_ids(&harness, &queue.name).await, vec![0]);

    // 15 more cross the threshold; the next check cuts shard 1.
    for _ in 0..15 {
        harness.send_text(&queue.name, "spill").await.unwrap();
    }
    let before_ms = chrono::Utc::now().timestamp_millis();
    harness.service.check_shards(&queue.name).await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        ids = default_shard_ids(&harness, &queue.name).await;
        if ids.len() == 2 {
            break;
        }
    }
    assert_eq!(ids, vec![0, 1], "shard ids stay dense from 0");

    let shards = harness
        .shards
        .list_shards(&queue.name, &harness.config.local_region, ShardKind::Default)
        .await
        .unwrap();
    assert!(
        shards.windows(2).all(|w| w[0].pivot < w[1].pivot),
        "pivots must increase with shard id"
    );
    assert!(
        shards[1].pivot.unix_ts_ms() > before_ms,
        "new pivot must sit in the future"
    );

    // The inflight family saw no traffic and keeps its single shard.
    assert_eq!(
        harness
            .shards
            .list_shards(&queue.name, &harness.config.local_region, ShardKind::Inflight)
            .await
            .unwrap()
            .len(),
        1
    );

    harness.service.shutdown();
}

#[tokio::test]
async fn old_shards_drain_before_the_current_one() {
    // A short advance window so freshly routed messages reach the new shard
    // within the test.
    let harness =
        TestQueueService::with_config(allocator_config(5, Duration::from_millis(200)));
    let queue = harness.create_queue_with("orders", 300, 10).await.unwrap();

    let mut sent = Vec::new();
    for i in 0..6 {
        sent.push(harness.send_text(&queue.name, &format!("old-{i}")).await.unwrap());
    }
    harness.service.check_shards(&queue.name).await.unwrap();
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if default_shard_ids(&harness, &queue.name).await.len() == 2 {
            break;
        }
    }
    assert_eq!(default_shard_ids(&harness, &queue.name).await, vec![0, 1]);

    // Past the advance window, new sends route into shard 1.
    tokio::time::sleep(Duration::from_millis(400)).await;
    for i in 0..3 {
        sent.push(harness.send_text(&queue.name, &format!("new-{i}")).await.unwrap());
    }

    let mut delivered = Vec::new();
    for _ in 0..50 {
        harness.service.refresh().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        for m in harness.service.get_next_messages(&queue.name, 10).await.unwrap() {
            delivered.push(m.message_id);
        }
        if delivered.len() == 9 {
            break;
        }
    }
    assert_eq!(delivered, sent, "older shard drains first, then the newer one");

    harness.service.shutdown();
}
