//! Command layer between the wire protocol and the [`Shortener`].
//!
//! ```text
//!   parse_command ──▶ CommandHandler::execute ──▶ Shortener / stats
//!                              │
//!                              ▼
//!                         Reply { frame, close }
//! ```
//!
//! [`Shortener`]: crate::shortener::Shortener

pub mod handler;

pub use handler::{CommandHandler, Reply, ServerState};
