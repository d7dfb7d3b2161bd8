//! Durable Store
//!
//! The mapping store and its expiry machinery.
//!
//! ```text
//!   ReplicationConsumer ──put──┐        ┌──get/delete── Shortener
//!                              ▼        ▼
//!                    ┌─────────────────────────┐
//!                    │      StorageEngine      │
//!                    │  64 × RwLock<HashMap>   │
//!                    └────────────▲────────────┘
//!                                 │ cleanup_expired
//!                    ┌────────────┴────────────┐
//!                    │      ExpirySweeper      │
//!                    │ (background Tokio task) │
//!                    └─────────────────────────┘
//! ```
//!
//! - [`engine`]: sharded map with lazy expiry
//! - [`store`]: the [`UrlStore`] trait the rest of the crate talks to
//! - [`expiry`]: active expiry task
//!
//! ## Example
//!
//! ```
//! use shortn::storage::{StorageEngine, UrlStore, MAPPING_TTL};
//!
//! let store = StorageEngine::new();
//! UrlStore::put(&store, "1EfYlH2c4IQ", "http://example.com", MAPPING_TTL).unwrap();
//! assert_eq!(UrlStore::get(&store, "1EfYlH2c4IQ").unwrap(), "http://example.com");
//! assert!(UrlStore::get(&store, "missing").unwrap_err().is_not_found());
//! ```

pub mod engine;
pub mod expiry;
pub mod store;

pub use engine::{StorageEngine, StorageStats};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};
pub use store::{UrlStore, MAPPING_TTL};
