//! Replication Consumer
//!
//! The single background worker that drains the event channel into the
//! store:
//!
//! ```text
//!   loop {
//!       payload = receiver.receive().await     // blocks, no timeout
//!       event   = decode(payload)              // failure → policy
//!       store.put(event.code, event.long_url)  // failure → policy
//!   }
//! ```
//!
//! Retries under `retry-N` are capped per attempt and in number, since a
//! retrying event holds up everything queued behind it. A failed receive is
//! followed by a short pause.
//!
//! The loop ends only when the channel closes. Nothing restarts it; if the
//! task dies, issuance keeps succeeding but nothing new becomes resolvable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ShortnError;
use crate::replication::channel::EventReceiver;
use crate::replication::event::ReplicationEvent;
use crate::replication::policy::{DeadLetterQueue, FailurePolicy, MAX_RETRIES};
use crate::storage::{UrlStore, MAPPING_TTL};

/// Base delay between retry attempts; doubles per attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Ceiling for a single retry delay.
const MAX_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Pause after a failed receive before asking the transport again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

fn retry_delay(attempt: u32) -> Duration {
    RETRY_BACKOFF
        .saturating_mul(1 << attempt.saturating_sub(1).min(16))
        .min(MAX_RETRY_BACKOFF)
}

/// Consumer counters.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    pub received: AtomicU64,
    pub applied: AtomicU64,
    pub dropped: AtomicU64,
    pub retried: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub receive_errors: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    pub received: u64,
    pub applied: u64,
    pub dropped: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub receive_errors: u64,
}

impl ConsumerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}

/// Everything needed to apply one event, kept apart from the receiver so the
/// apply step only borrows shared state.
struct Applier {
    store: Arc<dyn UrlStore>,
    policy: FailurePolicy,
    dead_letters: Arc<DeadLetterQueue>,
    stats: Arc<ConsumerStats>,
    ttl: Duration,
}

impl Applier {
    async fn apply(&self, payload: Bytes) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let event = match ReplicationEvent::from_payload(&payload) {
            Ok(event) => event,
            Err(err) => {
                self.give_up(payload, None, err);
                return;
            }
        };

        let mut attempt = 0u32;
        loop {
            match self.store.put(&event.code, &event.long_url, self.ttl) {
                Ok(()) => {
                    self.stats.applied.fetch_add(1, Ordering::Relaxed);
                    debug!(code = %event.code, "Mapping persisted");
                    return;
                }
                Err(err) => {
                    if let FailurePolicy::Retry(max) = self.policy {
                        if err.is_retryable() && attempt < max.min(MAX_RETRIES) {
                            attempt += 1;
                            self.stats.retried.fetch_add(1, Ordering::Relaxed);
                            warn!(code = %event.code, attempt, error = %err, "Retrying store write");
                            tokio::time::sleep(retry_delay(attempt)).await;
                            continue;
                        }
                    }
                    self.give_up(payload, Some(&event.code), err);
                    return;
                }
            }
        }
    }

    fn give_up(&self, payload: Bytes, code: Option<&str>, err: ShortnError) {
        let code = code.unwrap_or("<undecodable>");
        match self.policy {
            FailurePolicy::DeadLetter => {
                warn!(code, error = %err, "Parking replication event in dead-letter queue");
                if self.dead_letters.push(payload, err).is_some() {
                    warn!("Dead-letter queue full, evicted oldest entry");
                }
                self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
            }
            FailurePolicy::Drop | FailurePolicy::Retry(_) => {
                error!(code, error = %err, policy = %self.policy, "Dropping replication event");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Drains an [`EventReceiver`] into a [`UrlStore`].
///
/// # Example
///
/// ```ignore
/// let (producer, receiver) = channel(QueueConfig::default());
/// let consumer = ReplicationConsumer::new(receiver, store)
///     .with_policy(FailurePolicy::Retry(3));
/// let stats = consumer.stats();
/// let _worker = consumer.spawn();
/// ```
pub struct ReplicationConsumer<R: EventReceiver> {
    receiver: R,
    applier: Applier,
}

impl<R: EventReceiver + 'static> ReplicationConsumer<R> {
    pub fn new(receiver: R, store: Arc<dyn UrlStore>) -> Self {
        Self {
            receiver,
            applier: Applier {
                store,
                policy: FailurePolicy::default(),
                dead_letters: Arc::new(DeadLetterQueue::default()),
                stats: Arc::new(ConsumerStats::new()),
                ttl: MAPPING_TTL,
            },
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.applier.policy = policy;
        self
    }

    pub fn with_dead_letter_queue(mut self, queue: Arc<DeadLetterQueue>) -> Self {
        self.applier.dead_letters = queue;
        self
    }

    /// Overrides the mapping TTL. Production always uses [`MAPPING_TTL`].
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.applier.ttl = ttl;
        self
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.applier.stats)
    }

    pub fn dead_letters(&self) -> Arc<DeadLetterQueue> {
        Arc::clone(&self.applier.dead_letters)
    }

    /// Runs until the channel closes.
    pub async fn run(self) {
        let Self {
            mut receiver,
            applier,
        } = self;

        info!(policy = %applier.policy, "Replication consumer started");

        loop {
            match receiver.receive().await {
                Ok(Some(payload)) => applier.apply(payload).await,
                Ok(None) => break,
                Err(err) => {
                    applier.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                    error!(error = %err, "Error reading from replication channel");
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            }
        }

        info!("Replication channel closed, consumer stopped");
    }

    /// Spawns [`run`](Self::run) on the current runtime. The task is not
    /// supervised.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::replication::channel::{channel, EventProducer, QueueConfig};
    use crate::storage::StorageEngine;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Store whose `put` fails a fixed number of times before succeeding.
    struct FlakyStore {
        inner: StorageEngine,
        failures_left: Mutex<u32>,
        error: ShortnError,
    }

    impl FlakyStore {
        fn new(failures: u32, error: ShortnError) -> Self {
            Self {
                inner: StorageEngine::new(),
                failures_left: Mutex::new(failures),
                error,
            }
        }
    }

    impl UrlStore for FlakyStore {
        fn put(&self, code: &str, long_url: &str, ttl: Duration) -> Result<()> {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(self.error.clone());
            }
            UrlStore::put(&self.inner, code, long_url, ttl)
        }

        fn get(&self, code: &str) -> Result<String> {
            UrlStore::get(&self.inner, code)
        }

        fn delete(&self, code: &str) -> Result<()> {
            UrlStore::delete(&self.inner, code)
        }
    }

    /// Store that always fails writes for one code.
    struct PoisonedKeyStore {
        inner: StorageEngine,
        poisoned: &'static str,
    }

    impl UrlStore for PoisonedKeyStore {
        fn put(&self, code: &str, long_url: &str, ttl: Duration) -> Result<()> {
            if code == self.poisoned {
                return Err(ShortnError::TransientIo("connection reset".into()));
            }
            UrlStore::put(&self.inner, code, long_url, ttl)
        }

        fn get(&self, code: &str) -> Result<String> {
            UrlStore::get(&self.inner, code)
        }

        fn delete(&self, code: &str) -> Result<()> {
            UrlStore::delete(&self.inner, code)
        }
    }

    /// Receiver replaying a script of results, then reporting close.
    struct ScriptedReceiver {
        script: VecDeque<Result<Option<Bytes>>>,
    }

    #[async_trait]
    impl EventReceiver for ScriptedReceiver {
        async fn receive(&mut self) -> Result<Option<Bytes>> {
            self.script.pop_front().unwrap_or(Ok(None))
        }
    }

    fn payload(code: &str, url: &str) -> Bytes {
        ReplicationEvent::new(code, url).to_payload().unwrap()
    }

    #[tokio::test]
    async fn test_applies_events_until_channel_closes() {
        let store = Arc::new(StorageEngine::new());
        let (producer, receiver) = channel(QueueConfig::default());
        let consumer = ReplicationConsumer::new(receiver, store.clone());
        let stats = consumer.stats();

        producer.publish(payload("a", "http://a.example")).unwrap();
        producer.publish(payload("b", "http://b.example")).unwrap();
        drop(producer);

        consumer.spawn().await.unwrap();

        assert_eq!(store.get("a"), Some("http://a.example".to_string()));
        assert_eq!(store.get("b"), Some("http://b.example".to_string()));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.applied, 2);
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let store = Arc::new(StorageEngine::new());
        let (producer, receiver) = channel(QueueConfig::default());
        let consumer = ReplicationConsumer::new(receiver, store.clone());

        for _ in 0..3 {
            producer.publish(payload("a", "http://a.example")).unwrap();
        }
        drop(producer);
        consumer.spawn().await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a"), Some("http://a.example".to_string()));
    }

    #[tokio::test]
    async fn test_malformed_payload_dropped_and_loop_continues() {
        let store = Arc::new(StorageEngine::new());
        let (producer, receiver) = channel(QueueConfig::default());
        let consumer = ReplicationConsumer::new(receiver, store.clone());
        let stats = consumer.stats();

        producer.publish(Bytes::from_static(b"{garbage")).unwrap();
        producer.publish(payload("ok", "http://ok.example")).unwrap();
        drop(producer);
        consumer.spawn().await.unwrap();

        assert_eq!(store.get("ok"), Some("http://ok.example".to_string()));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.applied, 1);
    }

    #[tokio::test]
    async fn test_store_failure_dropped_under_drop_policy() {
        let store = Arc::new(FlakyStore::new(1, ShortnError::TransientIo("reset".into())));
        let (producer, receiver) = channel(QueueConfig::default());
        let consumer = ReplicationConsumer::new(receiver, store.clone());
        let stats = consumer.stats();

        producer.publish(payload("lost", "http://lost.example")).unwrap();
        drop(producer);
        consumer.spawn().await.unwrap();

        assert!(store.get("lost").unwrap_err().is_not_found());
        assert_eq!(stats.snapshot().dropped, 1);
        assert_eq!(stats.snapshot().retried, 0);
    }

    #[tokio::test]
    async fn test_retry_policy_recovers_transient_failures() {
        let store = Arc::new(FlakyStore::new(2, ShortnError::TransientIo("reset".into())));
        let (producer, receiver) = channel(QueueConfig::default());
        let consumer =
            ReplicationConsumer::new(receiver, store.clone()).with_policy(FailurePolicy::Retry(3));
        let stats = consumer.stats();

        producer.publish(payload("a", "http://a.example")).unwrap();
        drop(producer);
        consumer.spawn().await.unwrap();

        assert_eq!(store.get("a").unwrap(), "http://a.example");
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.retried, 2);
        assert_eq!(snapshot.applied, 1);
        assert_eq!(snapshot.dropped, 0);
    }

    #[tokio::test]
    async fn test_retry_policy_gives_up_after_budget() {
        let store = Arc::new(FlakyStore::new(10, ShortnError::TransientIo("down".into())));
        let (producer, receiver) = channel(QueueConfig::default());
        let consumer =
            ReplicationConsumer::new(receiver, store.clone()).with_policy(FailurePolicy::Retry(2));
        let stats = consumer.stats();

        producer.publish(payload("a", "http://a.example")).unwrap();
        drop(producer);
        consumer.spawn().await.unwrap();

        assert!(store.get("a").is_err());
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.retried, 2);
        assert_eq!(snapshot.dropped, 1);
    }

    #[test]
    fn test_retry_delay_is_capped() {
        assert_eq!(retry_delay(1), Duration::from_millis(10));
        assert_eq!(retry_delay(2), Duration::from_millis(20));
        assert_eq!(retry_delay(6), Duration::from_millis(320));
        assert_eq!(retry_delay(7), MAX_RETRY_BACKOFF);
        assert_eq!(retry_delay(u32::MAX), MAX_RETRY_BACKOFF);

        let total: Duration = (1..=MAX_RETRIES).map(retry_delay).sum();
        assert!(total < Duration::from_secs(2), "{:?}", total);
    }

    #[tokio::test]
    async fn test_retrying_event_does_not_starve_later_events() {
        let store = Arc::new(PoisonedKeyStore {
            inner: StorageEngine::new(),
            poisoned: "a",
        });
        let (producer, receiver) = channel(QueueConfig::default());
        // Built directly, so the parser's bound does not apply.
        let consumer = ReplicationConsumer::new(receiver, store.clone())
            .with_policy(FailurePolicy::Retry(u32::MAX));
        let stats = consumer.stats();
        let _worker = consumer.spawn();

        producer.publish(payload("a", "http://a.example")).unwrap();
        producer.publish(payload("b", "http://b.example")).unwrap();

        let mut resolved = None;
        for _ in 0..300 {
            if let Ok(url) = store.get("b") {
                resolved = Some(url);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(resolved.as_deref(), Some("http://b.example"));
        assert!(store.get("a").unwrap_err().is_not_found());
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.retried, u64::from(MAX_RETRIES));
        assert_eq!(snapshot.dropped, 1);
    }

    #[tokio::test]
    async fn test_retry_policy_skips_non_retryable_errors() {
        let store = Arc::new(FlakyStore::new(1, ShortnError::Validation("bad key".into())));
        let (producer, receiver) = channel(QueueConfig::default());
        let consumer =
            ReplicationConsumer::new(receiver, store.clone()).with_policy(FailurePolicy::Retry(5));
        let stats = consumer.stats();

        producer.publish(payload("a", "http://a.example")).unwrap();
        drop(producer);
        consumer.spawn().await.unwrap();

        assert_eq!(stats.snapshot().retried, 0);
        assert_eq!(stats.snapshot().dropped, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_policy_parks_failures() {
        let store = Arc::new(FlakyStore::new(1, ShortnError::TransientIo("reset".into())));
        let (producer, receiver) = channel(QueueConfig::default());
        let consumer = ReplicationConsumer::new(receiver, store.clone())
            .with_policy(FailurePolicy::DeadLetter);
        let dead_letters = consumer.dead_letters();
        let stats = consumer.stats();

        let first = payload("a", "http://a.example");
        producer.publish(first.clone()).unwrap();
        producer.publish(Bytes::from_static(b"[]")).unwrap();
        producer.publish(payload("b", "http://b.example")).unwrap();
        drop(producer);
        consumer.spawn().await.unwrap();

        let parked = dead_letters.drain();
        assert_eq!(parked.len(), 2);
        assert_eq!(parked[0].payload, first);
        assert!(matches!(parked[0].reason, ShortnError::TransientIo(_)));
        assert!(matches!(parked[1].reason, ShortnError::Serialization(_)));

        assert_eq!(store.get("b").unwrap(), "http://b.example");
        assert_eq!(stats.snapshot().dead_lettered, 2);
        assert_eq!(stats.snapshot().dropped, 0);
    }

    #[tokio::test]
    async fn test_receive_errors_do_not_stop_the_loop() {
        let store = Arc::new(StorageEngine::new());
        let receiver = ScriptedReceiver {
            script: VecDeque::from(vec![
                Err(ShortnError::TransientIo("broker hiccup".into())),
                Ok(Some(payload("a", "http://a.example"))),
            ]),
        };
        let consumer = ReplicationConsumer::new(receiver, store.clone());
        let stats = consumer.stats();

        consumer.run().await;

        assert_eq!(store.get("a"), Some("http://a.example".to_string()));
        assert_eq!(stats.snapshot().receive_errors, 1);
    }

    #[tokio::test]
    async fn test_receive_errors_are_paced() {
        let store = Arc::new(StorageEngine::new());
        let receiver = ScriptedReceiver {
            script: (0..3)
                .map(|_| Err(ShortnError::TransientIo("broker down".into())))
                .collect(),
        };
        let consumer = ReplicationConsumer::new(receiver, store);
        let stats = consumer.stats();

        let started = std::time::Instant::now();
        consumer.run().await;

        assert!(started.elapsed() >= RECEIVE_ERROR_BACKOFF * 3);
        assert_eq!(stats.snapshot().receive_errors, 3);
    }

    #[tokio::test]
    async fn test_written_entries_carry_ttl() {
        let store = Arc::new(StorageEngine::new());
        let (producer, receiver) = channel(QueueConfig::default());
        let consumer = ReplicationConsumer::new(receiver, store.clone())
            .with_ttl(Duration::from_millis(20));

        producer.publish(payload("a", "http://a.example")).unwrap();
        drop(producer);
        consumer.spawn().await.unwrap();

        assert!(store.exists("a"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("a"), None);
    }
}
