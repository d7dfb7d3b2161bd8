//! Event Channel Transport
//!
//! The producer and receiver seams, and the in-process implementation built on
//! a Tokio mpsc queue. A bounded queue never blocks issuance: when it is full
//! the publish fails right away with [`ShortnError::Publish`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Result, ShortnError};

/// Default number of events the in-process queue buffers.
pub const DEFAULT_QUEUE_CAPACITY: usize = 65_536;

/// Largest bounded capacity. Tokio's bounded channel panics above
/// `usize::MAX >> 3` permits.
pub const MAX_QUEUE_CAPACITY: usize = usize::MAX >> 4;

/// Accepts serialized replication events.
///
/// Success means the channel took the payload, never that it has been
/// applied to the store.
pub trait EventProducer: Send + Sync {
    fn publish(&self, payload: Bytes) -> Result<()>;
}

/// Blocking receive side of the channel.
#[async_trait]
pub trait EventReceiver: Send {
    /// Waits for the next payload.
    ///
    /// `Ok(None)` means the channel is closed and no more events will arrive.
    async fn receive(&mut self) -> Result<Option<Bytes>>;
}

/// Queue sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum buffered events; `0` means unbounded.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl QueueConfig {
    pub fn unbounded() -> Self {
        Self { capacity: 0 }
    }

    pub fn bounded(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity > MAX_QUEUE_CAPACITY {
            return Err(ShortnError::Configuration(format!(
                "queue capacity {} exceeds maximum {}",
                self.capacity, MAX_QUEUE_CAPACITY
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Tx {
    Bounded(mpsc::Sender<Bytes>),
    Unbounded(mpsc::UnboundedSender<Bytes>),
}

#[derive(Debug)]
enum Rx {
    Bounded(mpsc::Receiver<Bytes>),
    Unbounded(mpsc::UnboundedReceiver<Bytes>),
}

/// Cloneable producer half of the in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelProducer {
    tx: Tx,
    published: Arc<AtomicU64>,
}

/// Receiver half of the in-process channel. There is exactly one.
#[derive(Debug)]
pub struct ChannelReceiver {
    rx: Rx,
}

/// Creates a connected producer/receiver pair.
pub fn channel(config: QueueConfig) -> (ChannelProducer, ChannelReceiver) {
    let (tx, rx) = if config.capacity == 0 {
        let (tx, rx) = mpsc::unbounded_channel();
        (Tx::Unbounded(tx), Rx::Unbounded(rx))
    } else {
        let (tx, rx) = mpsc::channel(config.capacity.min(MAX_QUEUE_CAPACITY));
        (Tx::Bounded(tx), Rx::Bounded(rx))
    };

    (
        ChannelProducer {
            tx,
            published: Arc::new(AtomicU64::new(0)),
        },
        ChannelReceiver { rx },
    )
}

impl ChannelProducer {
    /// Total payloads accepted by the channel, across all clones.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl EventProducer for ChannelProducer {
    fn publish(&self, payload: Bytes) -> Result<()> {
        let len = payload.len();
        match &self.tx {
            Tx::Bounded(tx) => tx.try_send(payload).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    ShortnError::Publish("replication queue is full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    ShortnError::Publish("replication queue is closed".to_string())
                }
            })?,
            Tx::Unbounded(tx) => tx
                .send(payload)
                .map_err(|_| ShortnError::Publish("replication queue is closed".to_string()))?,
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        trace!(bytes = len, "Published replication event");
        Ok(())
    }
}

#[async_trait]
impl EventReceiver for ChannelReceiver {
    async fn receive(&mut self) -> Result<Option<Bytes>> {
        Ok(match &mut self.rx {
            Rx::Bounded(rx) => rx.recv().await,
            Rx::Unbounded(rx) => rx.recv().await,
        })
    }
}
