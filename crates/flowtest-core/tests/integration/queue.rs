//! Message queue polling and delivery tests

use super::common::{TestResult, queue};
use flowtest_core::{Message, MessageQueue, TestError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};

#[tokio::test(start_paused = true)]
async fn test_empty_receive_honours_bounded_wait() {
    let queue = MessageQueue::with_polling_interval("idle", Duration::from_millis(100));

    for timeout_ms in [0, 50, 100, 250, 1_000] {
        let timeout = Duration::from_millis(timeout_ms);
        let start = Instant::now();
        let result = queue.receive(|_| true, timeout).await;
        let elapsed = start.elapsed();

        assert!(result.is_none());
        assert!(elapsed >= timeout, "returned early for {timeout_ms}ms");
        assert!(
            elapsed < timeout + queue.polling_interval(),
            "overshot for {timeout_ms}ms: {elapsed:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_message_sent_mid_wait_is_seen_on_next_poll() -> TestResult {
    let queue = Arc::new(MessageQueue::with_polling_interval(
        "late",
        Duration::from_millis(100),
    ));
    let sender = Arc::clone(&queue);
    tokio::spawn(async move {
        sleep(Duration::from_millis(150)).await;
        sender.send(&Message::new("late"));
    });

    let start = Instant::now();
    let message = queue
        .receive(|m| m.payload == "late", Duration::from_secs(1))
        .await
        .ok_or_else(|| TestError::action("late message not received"))?;
    let elapsed = start.elapsed();

    assert_eq!(message.payload, "late");
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed <= Duration::from_millis(200));
    Ok(())
}

#[tokio::test]
async fn test_selection_follows_insertion_order() {
    let queue = queue("ordered");
    queue.send(&Message::new("a").with_header("type", "x"));
    queue.send(&Message::new("b").with_header("type", "y"));
    queue.send(&Message::new("c").with_header("type", "x"));

    let is_x = |m: &Message| m.header("type") == Some("x");
    let first = queue.receive(is_x, Duration::ZERO).await;
    let second = queue.receive(is_x, Duration::ZERO).await;
    let third = queue.receive(is_x, Duration::ZERO).await;

    assert_eq!(first.map(|m| m.payload), Some("a".to_string()));
    assert_eq!(second.map(|m| m.payload), Some("c".to_string()));
    assert!(third.is_none());
    assert_eq!(queue.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_receivers_get_each_message_once() -> TestResult {
    let queue = queue("shared");
    for n in 0..100 {
        queue.send(&Message::new(n.to_string()));
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut received = Vec::new();
                while let Some(message) = queue.receive(|_| true, Duration::from_millis(20)).await {
                    received.push(message.id);
                }
                received
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        let received = handle
            .await
            .map_err(|e| TestError::action(format!("receiver panicked: {e}")))?;
        all.extend(received);
    }

    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), 100);
    assert_eq!(unique.len(), 100);
    assert!(queue.is_empty());
    Ok(())
}
