//! What the consumer does with an event it could not apply.
//!
//! | Policy        | Malformed payload | Store failure                        |
//! |---------------|-------------------|--------------------------------------|
//! | `drop`        | log, discard      | log, discard                         |
//! | `retry-N`     | log, discard      | re-apply up to N times, then discard |
//! | `dead-letter` | park              | park                                 |
//!
//! `drop` is the default. A discarded event is a mapping that will never
//! resolve.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::ShortnError;

/// Default number of parked events kept by a [`DeadLetterQueue`].
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 10_000;

/// Upper bound on `retry-N`. The consumer applies events one at a time, so
/// every retry delays all events queued behind it.
pub const MAX_RETRIES: u32 = 8;

/// Failure handling for the replication consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    Drop,
    /// Extra attempts for retryable store failures, at most [`MAX_RETRIES`].
    Retry(u32),
    DeadLetter,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Drop => write!(f, "drop"),
            FailurePolicy::Retry(n) => write!(f, "retry-{}", n),
            FailurePolicy::DeadLetter => write!(f, "dead-letter"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = ShortnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "drop" => Ok(FailurePolicy::Drop),
            "dead-letter" | "deadletter" | "dlq" => Ok(FailurePolicy::DeadLetter),
            other => match other.strip_prefix("retry-").map(str::parse::<u32>) {
                Some(Ok(n)) if n <= MAX_RETRIES => Ok(FailurePolicy::Retry(n)),
                Some(Ok(n)) => Err(ShortnError::Configuration(format!(
                    "retry-{} exceeds the maximum of {} retries",
                    n, MAX_RETRIES
                ))),
                _ => Err(ShortnError::Configuration(format!(
                    "unknown failure policy {:?} (expected drop, retry-N or dead-letter)",
                    s
                ))),
            },
        }
    }
}

/// An event the consumer gave up on.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// The raw payload as received
    pub payload: Bytes,
    pub reason: ShortnError,
    pub failed_at: DateTime<Utc>,
}

/// Bounded holding area for failed events. The oldest entry is evicted
/// when full.
#[derive(Debug)]
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(DEFAULT_DEAD_LETTER_CAPACITY)
    }
}

impl DeadLetterQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Parks a failed event. Returns the evicted entry, if any.
    pub fn push(&self, payload: Bytes, reason: ShortnError) -> Option<DeadLetter> {
        let mut entries = self.entries.lock();
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        entries.push_back(DeadLetter {
            payload,
            reason,
            failed_at: Utc::now(),
        });
        evicted
    }

    /// Removes and returns everything parked so far, oldest first.
    pub fn drain(&self) -> Vec<DeadLetter> {
        self.entries.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
