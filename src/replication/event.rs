//! Replication event wire format.
//!
//! A flat JSON object with two fields:
//!
//! ```json
//! {"short_url": "1EfYlH2c4IQ", "long_url": "http://example.com"}
//! ```
//!
//! `code` and `longUrl` are accepted as alternative field names, and unknown
//! fields are ignored so newer producers can add fields without breaking
//! older consumers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// `(code, long URL)` in flight from issuance to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationEvent {
    #[serde(rename = "short_url", alias = "code")]
    pub code: String,
    #[serde(rename = "long_url", alias = "longUrl")]
    pub long_url: String,
}

impl ReplicationEvent {
    pub fn new(code: impl Into<String>, long_url: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            long_url: long_url.into(),
        }
    }

    pub fn to_payload(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}
