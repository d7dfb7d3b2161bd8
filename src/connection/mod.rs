//! Client connections.
//!
//! The listener in `main.rs` spawns one [`handle_connection`] task per
//! accepted socket; there is no cap on concurrent clients.
//!
//! ```ignore
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler.clone(), stats.clone()));
//! ```

pub mod handler;

pub use handler::{handle_connection, Connection, ConnectionError, ConnectionStats};
