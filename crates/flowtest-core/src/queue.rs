//! In-memory message queue with predicate selection and bounded polling.

use crate::config::EngineConfig;
use crate::message::{Correlator, Message};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace};
use uuid::Uuid;

/// Default delay between two queue scans.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(500);

/// Shortest delay between two queue scans.
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_millis(1);

fn clamp_interval(interval: Duration) -> Duration {
    interval.max(MIN_POLLING_INTERVAL)
}

/// Number of re-scans after the initial scan for a bounded receive.
#[must_use]
pub fn retry_count(timeout: Duration, interval: Duration) -> u64 {
    let interval_ms = clamp_interval(interval).as_millis();
    u64::try_from(timeout.as_millis().div_ceil(interval_ms)).unwrap_or(u64::MAX)
}

/// Predicate selecting the reply correlated with `key`.
///
/// Without a correlator or key every message matches.
pub fn correlation_predicate<'a>(
    key: Option<&'a str>,
    correlator: Option<&'a dyn Correlator>,
) -> impl Fn(&Message) -> bool + 'a {
    move |message| match (key, correlator) {
        (Some(key), Some(correlator)) => {
            correlator.correlation_key(message).as_deref() == Some(key)
        }
        _ => true,
    }
}

/// A thread-safe mailbox. Each message is handed to at most one receiver.
#[derive(Debug)]
pub struct MessageQueue {
    name: String,
    messages: Mutex<VecDeque<Message>>,
    polling_interval: Option<Duration>,
}

impl MessageQueue {
    /// Queue without an own polling interval. Endpoints poll it at the
    /// engine's configured interval.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Mutex::new(VecDeque::new()),
            polling_interval: None,
        }
    }

    /// Queue polled at `polling_interval`, raised to [`MIN_POLLING_INTERVAL`].
    pub fn with_polling_interval(name: impl Into<String>, polling_interval: Duration) -> Self {
        Self {
            polling_interval: Some(clamp_interval(polling_interval)),
            ..Self::new(name)
        }
    }

    /// Queue polled at the interval configured for the engine.
    pub fn from_config(name: impl Into<String>, config: &EngineConfig) -> Self {
        Self::with_polling_interval(name, config.polling_interval())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interval set on this queue, if any.
    #[must_use]
    pub const fn configured_interval(&self) -> Option<Duration> {
        self.polling_interval
    }

    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        self.polling_interval.unwrap_or(DEFAULT_POLLING_INTERVAL)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a copy of the message, assigning an id if it has none.
    pub fn send(&self, message: &Message) {
        let mut copy = message.clone();
        if copy.id.is_empty() {
            copy.id = Uuid::new_v4().to_string();
            copy.timestamp = OffsetDateTime::now_utc();
        }
        debug!(queue = %self.name, "enqueue message {}", copy.id);
        self.lock().push_back(copy);
    }

    /// Remove and return the first queued message matching `predicate`.
    pub fn take_first<P>(&self, predicate: P) -> Option<Message>
    where
        P: Fn(&Message) -> bool,
    {
        let mut messages = self.lock();
        let index = messages.iter().position(|m| predicate(m))?;
        messages.remove(index)
    }

    /// Poll for a message matching `predicate` until `timeout` elapses,
    /// at this queue's polling interval.
    pub async fn receive<P>(&self, predicate: P, timeout: Duration) -> Option<Message>
    where
        P: Fn(&Message) -> bool,
    {
        self.receive_every(predicate, timeout, self.polling_interval()).await
    }

    /// Poll for a message matching `predicate` until `timeout` elapses.
    ///
    /// The queue is scanned once immediately and then once per `interval`,
    /// `retry_count(timeout, interval)` more times. The last sleep is
    /// shortened so the total wait never exceeds `timeout`.
    pub async fn receive_every<P>(
        &self,
        predicate: P,
        timeout: Duration,
        interval: Duration,
    ) -> Option<Message>
    where
        P: Fn(&Message) -> bool,
    {
        let interval = clamp_interval(interval);
        let deadline = Instant::now() + timeout;
        let retries = retry_count(timeout, interval);
        let mut attempt: u64 = 0;

        loop {
            trace!(queue = %self.name, attempt, "scanning queue");
            if let Some(message) = self.take_first(&predicate) {
                debug!(queue = %self.name, "received message {}", message.id);
                return Some(message);
            }
            if attempt >= retries {
                debug!(queue = %self.name, "no matching message after {} poll(s)", attempt + 1);
                return None;
            }
            attempt += 1;

            let wait = deadline.saturating_duration_since(Instant::now()).min(interval);
            sleep(wait).await;
        }
    }

    /// Receive the reply correlated with `key`.
    ///
    /// Without a correlator or key the first available message is returned.
    pub async fn receive_correlated(
        &self,
        key: Option<&str>,
        correlator: Option<&dyn Correlator>,
        timeout: Duration,
    ) -> Option<Message> {
        self.receive(correlation_predicate(key, correlator), timeout).await
    }

    /// Drop every queued message, returning how many were removed.
    pub fn purge(&self) -> usize {
        let mut messages = self.lock();
        let count = messages.len();
        messages.clear();
        count
    }

    /// Drop queued messages matching `predicate`.
    pub fn purge_matching<P>(&self, predicate: P) -> usize
    where
        P: Fn(&Message) -> bool,
    {
        let mut messages = self.lock();
        let before = messages.len();
        messages.retain(|m| !predicate(m));
        before - messages.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CORRELATION_HEADER, HeaderCorrelator};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_retry_count() {
        let interval = Duration::from_millis(500);
        assert_eq!(retry_count(Duration::ZERO, interval), 0);
        assert_eq!(retry_count(Duration::from_millis(500), interval), 1);
        assert_eq!(retry_count(Duration::from_millis(501), interval), 2);
        assert_eq!(retry_count(Duration::from_millis(1000), interval), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_returns_first_match_in_insertion_order() {
        let queue = MessageQueue::new("q");
        queue.send(&Message::new("a").with_header("kind", "x"));
        queue.send(&Message::new("b").with_header("kind", "y"));
        queue.send(&Message::new("c").with_header("kind", "y"));

        let received = queue
            .receive(|m| m.header("kind") == Some("y"), Duration::from_secs(1))
            .await;
        assert_eq!(received.map(|m| m.payload), Some("b".to_string()));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_timeout_bounds_and_poll_count() {
        let queue = MessageQueue::with_polling_interval("q", Duration::from_millis(100));
        queue.send(&Message::new("never"));
        let polls = AtomicUsize::new(0);
        let timeout = Duration::from_millis(1000);

        let start = Instant::now();
        let received = queue
            .receive(
                |_| {
                    polls.fetch_add(1, Ordering::SeqCst);
                    false
                },
                timeout,
            )
            .await;
        let elapsed = start.elapsed();

        assert!(received.is_none());
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(100));
        // one initial scan plus ceil(1000 / 100) retries
        assert_eq!(polls.load(Ordering::SeqCst), 11);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_polling_interval_still_waits_for_timeout() {
        let queue = MessageQueue::with_polling_interval("q", Duration::ZERO);
        assert_eq!(queue.polling_interval(), MIN_POLLING_INTERVAL);
        let polls = AtomicUsize::new(0);
        let timeout = Duration::from_millis(20);

        let start = Instant::now();
        let received = queue
            .receive(
                |_| {
                    polls.fetch_add(1, Ordering::SeqCst);
                    false
                },
                timeout,
            )
            .await;

        assert!(received.is_none());
        assert!(start.elapsed() >= timeout);
        assert_eq!(polls.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn test_polling_interval_from_config() {
        let config = EngineConfig {
            polling_interval_ms: 100,
            ..EngineConfig::default()
        };
        let queue = MessageQueue::from_config("q", &config);
        assert_eq!(queue.configured_interval(), Some(Duration::from_millis(100)));
        assert_eq!(MessageQueue::new("q").configured_interval(), None);
        assert_eq!(MessageQueue::new("q").polling_interval(), DEFAULT_POLLING_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_scans_once() {
        let queue = MessageQueue::new("q");
        let start = Instant::now();
        assert!(queue.receive(|_| true, Duration::ZERO).await.is_none());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_sent_mid_wait_is_observed() {
        let queue = Arc::new(MessageQueue::with_polling_interval(
            "q",
            Duration::from_millis(100),
        ));
        let sender = Arc::clone(&queue);
        tokio::spawn(async move {
            sleep(Duration::from_millis(250)).await;
            sender.send(&Message::new("late"));
        });

        let start = Instant::now();
        let received = queue.receive(|_| true, Duration::from_secs(5)).await;
        assert_eq!(received.map(|m| m.payload), Some("late".to_string()));
        assert!(start.elapsed() <= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_receivers_get_distinct_messages() {
        let queue = Arc::new(MessageQueue::with_polling_interval(
            "q",
            Duration::from_millis(10),
        ));
        for i in 0..4 {
            queue.send(&Message::new(format!("m{i}")));
        }
        let mut handles = Vec::new();
        for _ in 0..4 {
            let q = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                q.receive(|_| true, Duration::from_millis(100)).await
            }));
        }
        let mut payloads = Vec::new();
        for handle in handles {
            if let Ok(Some(m)) = handle.await {
                payloads.push(m.payload);
            }
        }
        payloads.sort();
        assert_eq!(payloads, vec!["m0", "m1", "m2", "m3"]);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_correlated() {
        let queue = MessageQueue::new("q");
        let correlator = HeaderCorrelator::default();
        queue.send(&Message::new("other").with_header(CORRELATION_HEADER, "k1"));
        queue.send(&Message::new("mine").with_header(CORRELATION_HEADER, "k2"));

        let reply = queue
            .receive_correlated(Some("k2"), Some(&correlator), Duration::from_millis(10))
            .await;
        assert_eq!(reply.map(|m| m.payload), Some("mine".to_string()));

        let fallback = queue
            .receive_correlated(Some("k2"), None, Duration::from_millis(10))
            .await;
        assert_eq!(fallback.map(|m| m.payload), Some("other".to_string()));
    }

    #[test]
    fn test_purge_matching() {
        let queue = MessageQueue::new("q");
        queue.send(&Message::new("a").with_header("k", "1"));
        queue.send(&Message::new("b").with_header("k", "2"));
        assert_eq!(queue.purge_matching(|m| m.header("k") == Some("1")), 1);
        assert_eq!(queue.purge(), 1);
        assert!(queue.is_empty());
    }
}
