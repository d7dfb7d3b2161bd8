//! Snowflake Generator
//!
//! The timestamp/sequence state machine is `ferroid`'s lock-based Twitter
//! layout generator. This module binds it to an RFC 3339 epoch and a node id
//! and decides what to do when `ferroid` reports that no id is ready yet:
//!
//! - **Sequence exhausted**: the next millisecond is at most 1 ms away, so
//!   the caller yields until it arrives.
//! - **Clock stepped back**: the caller spins for up to [`MAX_CLOCK_WAIT`],
//!   then gets [`ShortnError::TransientIo`].
//!
//! Issuance runs on async worker threads and never sleeps.
//!
//! Identifiers from one generator are strictly increasing.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use chrono::DateTime;
use ferroid::generator::{IdGenStatus, LockSnowflakeGenerator};
use ferroid::id::SnowflakeTwitterId;
use tracing::{debug, trace, warn};

use crate::error::{Result, ShortnError};
use crate::id::clock::{SystemClock, TimeSource};
use crate::id::IdGenerator;

/// Epoch used when none is configured (2010-11-04, the classic Twitter epoch day).
pub const DEFAULT_EPOCH: &str = "2010-11-04T00:00:00Z";

/// Node id used when none is configured.
pub const DEFAULT_NODE_ID: u16 = 1;

/// How long a caller spins on a clock that moved backwards before giving up.
pub const MAX_CLOCK_WAIT: Duration = Duration::from_millis(2);

const TIMESTAMP_BITS: u32 = 41;
const NODE_BITS: u32 = 10;

const MAX_TIMESTAMP: i64 = (1 << TIMESTAMP_BITS) - 1;

/// Largest node id that fits the 10-bit node field.
pub const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;

/// 1 sign bit (always 0), 41 timestamp bits, 10 node bits, 12 sequence bits.
pub type SnowflakeId = SnowflakeTwitterId;

/// Process-wide generator settings, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnowflakeConfig {
    /// Custom epoch in RFC 3339 form, e.g. `2010-11-04T00:00:00Z`.
    pub epoch: String,
    /// Node id embedded in every identifier (0..=1023).
    pub node_id: u16,
}

impl Default for SnowflakeConfig {
    fn default() -> Self {
        Self {
            epoch: DEFAULT_EPOCH.to_string(),
            node_id: DEFAULT_NODE_ID,
        }
    }
}

impl SnowflakeConfig {
    /// Parses the configured epoch into Unix milliseconds.
    pub fn epoch_millis(&self) -> Result<i64> {
        DateTime::parse_from_rfc3339(&self.epoch)
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| {
                ShortnError::Configuration(format!("invalid epoch {:?}: {}", self.epoch, e))
            })
    }

    /// Checks the node id range and that the epoch parses.
    pub fn validate(&self) -> Result<()> {
        if self.node_id > MAX_NODE_ID {
            return Err(ShortnError::Configuration(format!(
                "node id {} exceeds maximum {}",
                self.node_id, MAX_NODE_ID
            )));
        }
        self.epoch_millis().map(|_| ())
    }
}

/// Milliseconds since the custom epoch, as `ferroid` wants them.
#[derive(Debug, Clone)]
struct EpochClock<T> {
    clock: T,
    epoch_ms: i64,
}

impl<T: TimeSource> EpochClock<T> {
    #[inline]
    fn elapsed(&self) -> i64 {
        self.clock.now_millis() - self.epoch_ms
    }
}

impl<T: TimeSource> ferroid::time::TimeSource<u64> for EpochClock<T> {
    fn current_millis(&self) -> u64 {
        self.elapsed().clamp(0, MAX_TIMESTAMP) as u64
    }
}

/// Thread-safe Snowflake generator for a single node.
pub struct SnowflakeGenerator<T: TimeSource = SystemClock> {
    node_id: u16,
    clock: EpochClock<T>,
    /// Highest timestamp handed out, to tell a stepped-back clock from an
    /// exhausted sequence.
    last_timestamp: AtomicI64,
    inner: LockSnowflakeGenerator<SnowflakeTwitterId, EpochClock<T>>,
}

impl<T: TimeSource> fmt::Debug for SnowflakeGenerator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnowflakeGenerator")
            .field("epoch_ms", &self.clock.epoch_ms)
            .field("node_id", &self.node_id)
            .finish()
    }
}

impl SnowflakeGenerator<SystemClock> {
    /// Creates a generator driven by the system clock.
    pub fn new(config: &SnowflakeConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<T: TimeSource> SnowflakeGenerator<T> {
    /// Creates a generator with an explicit time source.
    ///
    /// Fails with [`ShortnError::Configuration`] when the epoch does not
    /// parse, lies in the future, or the node id does not fit in 10 bits.
    pub fn with_clock(config: &SnowflakeConfig, clock: T) -> Result<Self> {
        config.validate()?;
        let clock = EpochClock {
            clock,
            epoch_ms: config.epoch_millis()?,
        };

        if clock.elapsed() < 0 {
            return Err(ShortnError::Configuration(format!(
                "epoch {} is in the future",
                config.epoch
            )));
        }

        debug!(epoch = %config.epoch, node_id = config.node_id, "Snowflake generator ready");

        Ok(Self {
            node_id: config.node_id,
            inner: LockSnowflakeGenerator::new(u64::from(config.node_id), clock.clone()),
            clock,
            last_timestamp: AtomicI64::new(0),
        })
    }

    /// Issues the next identifier.
    ///
    /// Yields through sequence exhaustion. A clock that stays behind the
    /// last issued timestamp for longer than [`MAX_CLOCK_WAIT`] fails the
    /// call with [`ShortnError::TransientIo`]; a later call may succeed.
    pub fn next_id(&self) -> Result<SnowflakeId> {
        let mut behind_since: Option<Instant> = None;

        loop {
            let elapsed = self.clock.elapsed();
            if elapsed < 0 {
                return Err(ShortnError::Configuration(
                    "system clock is behind the configured epoch".to_string(),
                ));
            }
            if elapsed > MAX_TIMESTAMP {
                return Err(ShortnError::Configuration(
                    "timestamp no longer fits in 41 bits; choose a later epoch".to_string(),
                ));
            }

            let status = self
                .inner
                .try_next_id()
                .map_err(|e| ShortnError::TransientIo(format!("snowflake generator: {}", e)))?;

            match status {
                IdGenStatus::Ready { id } => {
                    self.last_timestamp
                        .fetch_max(id.timestamp() as i64, Ordering::Relaxed);
                    trace!(id = %id, "Generated id");
                    return Ok(id);
                }
                IdGenStatus::Pending { .. } => {
                    let last = self.last_timestamp.load(Ordering::Relaxed);
                    if elapsed < last {
                        let since = *behind_since.get_or_insert_with(Instant::now);
                        if since.elapsed() >= MAX_CLOCK_WAIT {
                            warn!(behind_ms = last - elapsed, "Clock moved backwards");
                            return Err(ShortnError::TransientIo(format!(
                                "clock is {} ms behind the last issued id",
                                last - elapsed
                            )));
                        }
                    }
                    std::thread::yield_now();
                }
            }
        }
    }
}

impl<T: TimeSource> IdGenerator for SnowflakeGenerator<T> {
    fn generate(&self) -> Result<i64> {
        let raw = self.next_id()?.to_raw();
        i64::try_from(raw)
            .map_err(|_| ShortnError::Configuration(format!("identifier {} has the sign bit set", raw)))
    }
}
