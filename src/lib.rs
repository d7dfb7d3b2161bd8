//! # shortn
//!
//! The core of a URL shortener: Snowflake identifiers, bijective base-62
//! short codes, and an asynchronous replication channel that decouples
//! handing out a code from persisting it. The binary serves the pipeline
//! over the Redis protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  TCP listener ──▶ Connection ──▶ CommandHandler ──▶ Shortener        │
//! │                                                        │             │
//! │          shorten ┌──────────────┬──────────────────────┤             │
//! │                  ▼              ▼                      │ resolve     │
//! │         SnowflakeGenerator  Base62Encoder              │ delete      │
//! │                  │              │                      │             │
//! │                  └──────┬───────┘                      │             │
//! │                         ▼                              ▼             │
//! │                  EventProducer ──▶ [queue] ──▶  ┌───────────────┐    │
//! │                                       │         │ StorageEngine │    │
//! │                          ReplicationConsumer ──▶│  64 shards    │    │
//! │                          (one task, put+TTL)    └───────▲───────┘    │
//! │                                                         │            │
//! │                                                  ExpirySweeper       │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `shorten` returns as soon as the event is queued. Until the consumer has
//! written the mapping, the new code resolves exactly like one never issued.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use shortn::id::{SnowflakeConfig, SnowflakeGenerator};
//! use shortn::replication::{channel, QueueConfig, ReplicationConsumer};
//! use shortn::storage::StorageEngine;
//! use shortn::{Base62Encoder, Shortener};
//!
//! # async fn demo() -> shortn::Result<()> {
//! let store = Arc::new(StorageEngine::new());
//! let (producer, receiver) = channel(QueueConfig::default());
//! let _worker = ReplicationConsumer::new(receiver, store.clone()).spawn();
//!
//! let shortener = Shortener::new(
//!     Arc::new(SnowflakeGenerator::new(&SnowflakeConfig::default())?),
//!     Arc::new(Base62Encoder),
//!     Arc::new(producer),
//!     store,
//! );
//!
//! let code = shortener.shorten("http://example.com")?;
//! // Possibly NotFound until the consumer catches up.
//! let _ = shortener.resolve(&code);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`id`]: Snowflake identifier generation
//! - [`codec`]: bijective base-62 codes
//! - [`storage`]: TTL key-value store and expiry sweeper
//! - [`replication`]: event channel, consumer and failure policies
//! - [`shortener`]: the three inbound operations
//! - [`protocol`], [`commands`], [`connection`]: the RESP front end
//! - [`config`]: flags and environment

pub mod codec;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod id;
pub mod protocol;
pub mod replication;
pub mod shortener;
pub mod storage;

pub use codec::{Base62Encoder, CodeEncoder};
pub use commands::{CommandHandler, ServerState};
pub use config::{CliArgs, Config};
pub use connection::{handle_connection, ConnectionStats};
pub use error::{Result, ShortnError};
pub use id::{IdGenerator, SnowflakeGenerator};
pub use replication::{EventProducer, FailurePolicy, ReplicationConsumer};
pub use shortener::Shortener;
pub use storage::{start_expiry_sweeper, StorageEngine, UrlStore};

/// Default listening port (one above Redis).
pub const DEFAULT_PORT: u16 = 6380;

pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
