//! The durable-store seam used by the shortener and the replication consumer.

use std::time::Duration;

use crate::error::{Result, ShortnError};
use crate::storage::StorageEngine;

/// How long a mapping lives after the consumer writes it (31 days).
pub const MAPPING_TTL: Duration = Duration::from_secs(31 * 24 * 60 * 60);

/// Key-value store with per-entry TTL holding `code -> long URL`.
///
/// Implementations must report an absent key as [`ShortnError::NotFound`]
/// and any other failure as [`ShortnError::TransientIo`]. Expiry is the
/// store's own business; callers never reap.
pub trait UrlStore: Send + Sync {
    /// Writes a mapping. Overwrites are allowed, which makes redelivered
    /// replication events harmless.
    fn put(&self, code: &str, long_url: &str, ttl: Duration) -> Result<()>;

    fn get(&self, code: &str) -> Result<String>;

    fn delete(&self, code: &str) -> Result<()>;
}

impl UrlStore for StorageEngine {
    fn put(&self, code: &str, long_url: &str, ttl: Duration) -> Result<()> {
        StorageEngine::put(self, code, long_url, ttl);
        Ok(())
    }

    fn get(&self, code: &str) -> Result<String> {
        StorageEngine::get(self, code).ok_or_else(|| ShortnError::NotFound(code.to_string()))
    }

    fn delete(&self, code: &str) -> Result<()> {
        if StorageEngine::delete(self, code) {
            Ok(())
        } else {
            Err(ShortnError::NotFound(code.to_string()))
        }
    }
}
