//! Identifier Generation
//!
//! Backed by the `ferroid` crate's lock-based Snowflake generator.
//!
//! Short codes are derived from 64-bit Snowflake identifiers: a millisecond
//! timestamp relative to a custom epoch, a fixed node id and a per-millisecond
//! sequence counter, packed as
//!
//! ```text
//!  63      62                      22 21          12 11            0
//! ┌───┬──────────────────────────────┬──────────────┬───────────────┐
//! │ 0 │ timestamp (41 bits, ms)      │ node (10)    │ sequence (12) │
//! └───┴──────────────────────────────┴──────────────┴───────────────┘
//! ```
//!
//! The sign bit is never set, so every identifier is a valid encoder input.
//! Uniqueness across processes relies on each running instance having its own
//! node id; the reference deployment runs a single node.

pub mod clock;
pub mod snowflake;

pub use clock::{ManualClock, SystemClock, TimeSource};
pub use snowflake::{
    SnowflakeConfig, SnowflakeGenerator, SnowflakeId, DEFAULT_EPOCH, DEFAULT_NODE_ID, MAX_CLOCK_WAIT,
    MAX_NODE_ID,
};

use crate::error::Result;

/// Issues identifiers for new short codes.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> Result<i64>;
}
