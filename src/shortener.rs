//! Shortener
//!
//! Composes the id generator, code encoder, event producer and store into
//! the three inbound operations.
//!
//! ```text
//!   shorten(url):  generate ─▶ encode ─▶ publish ─▶ return code
//!   resolve(code): store.get
//!   delete(code):  store.delete
//! ```
//!
//! `shorten` returns before the mapping is persisted. Until the replication
//! consumer applies the event, `resolve` and `delete` on the fresh code
//! report [`ShortnError::NotFound`], exactly as for a code never issued.

use std::sync::Arc;

use tracing::debug;

use crate::codec::{is_valid_code, CodeEncoder};
use crate::error::{Result, ShortnError};
use crate::id::IdGenerator;
use crate::replication::{EventProducer, ReplicationEvent};
use crate::storage::UrlStore;

/// The issuance and resolution pipeline.
///
/// Cheap to clone; every clone shares the same components.
#[derive(Clone)]
pub struct Shortener {
    generator: Arc<dyn IdGenerator>,
    encoder: Arc<dyn CodeEncoder>,
    producer: Arc<dyn EventProducer>,
    store: Arc<dyn UrlStore>,
}

impl Shortener {
    pub fn new(
        generator: Arc<dyn IdGenerator>,
        encoder: Arc<dyn CodeEncoder>,
        producer: Arc<dyn EventProducer>,
        store: Arc<dyn UrlStore>,
    ) -> Self {
        Self {
            generator,
            encoder,
            producer,
            store,
        }
    }

    /// Issues a code for `long_url` and queues it for persistence.
    ///
    /// The first failing step's error is returned as-is.
    pub fn shorten(&self, long_url: &str) -> Result<String> {
        if long_url.is_empty() {
            return Err(ShortnError::Validation("url must not be empty".to_string()));
        }

        let id = self.generator.generate()?;
        let code = self.encoder.encode(id)?;
        let payload = ReplicationEvent::new(code.as_str(), long_url).to_payload()?;
        self.producer.publish(payload)?;

        debug!(code = %code, id, "Issued short code");
        Ok(code)
    }

    pub fn resolve(&self, code: &str) -> Result<String> {
        check_code(code)?;
        let long_url = self.store.get(code)?;
        debug!(code, "Resolved short code");
        Ok(long_url)
    }

    pub fn delete(&self, code: &str) -> Result<()> {
        check_code(code)?;
        self.store.delete(code)?;
        debug!(code, "Deleted short code");
        Ok(())
    }
}

fn check_code(code: &str) -> Result<()> {
    if code.is_empty() {
        return Err(ShortnError::Validation("code must not be empty".to_string()));
    }
    if !is_valid_code(code) {
        return Err(ShortnError::Validation(format!(
            "code {:?} contains characters outside [0-9A-Za-z]",
            code
        )));
    }
    Ok(())
}
