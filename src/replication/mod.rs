//! Replication Channel
//!
//! Carries newly issued mappings from the issuing path to the store.
//!
//! ```text
//!   Shortener::shorten                         ReplicationConsumer (1 task)
//!        │                                              │
//!        │ ReplicationEvent → JSON                      │ JSON → ReplicationEvent
//!        ▼                                              ▼
//!   EventProducer::publish ──▶ [ mpsc queue ] ──▶ EventReceiver::receive
//!                                                       │
//!                                                       ▼
//!                                           UrlStore::put(code, url, TTL)
//! ```
//!
//! Delivery is at-least-once and the store write is idempotent, so a
//! redelivered event rewrites the same mapping and refreshes its TTL. A code
//! returned by `shorten` is not resolvable until the consumer has applied
//! its event.

pub mod channel;
pub mod consumer;
pub mod event;
pub mod policy;

pub use channel::{
    channel, ChannelProducer, ChannelReceiver, EventProducer, EventReceiver, QueueConfig,
    DEFAULT_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY,
};
pub use consumer::{ConsumerStats, ConsumerStatsSnapshot, ReplicationConsumer};
pub use event::ReplicationEvent;
pub use policy::{
    DeadLetter, DeadLetterQueue, FailurePolicy, DEFAULT_DEAD_LETTER_CAPACITY, MAX_RETRIES,
};
