//! Per-client session.
//!
//! ```text
//!   read into buffer ──▶ parse_command* ──▶ execute ──▶ write reply
//!          ▲                  │ incomplete                 │
//!          └──────────────────┘                            │
//!          └───────────────────────────────────────────────┘
//! ```
//!
//! Pipelined requests in one read are answered in order. A malformed request
//! ends the session, since there is no way to resynchronise on the stream.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::commands::{CommandHandler, Reply};
use crate::protocol::{parse_command, Frame, ParseError};

/// Bytes buffered for one unfinished request before the client is cut off.
const MAX_BUFFER_SIZE: usize = 2 * 1024 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    fn closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed request: {0}")]
    Parse(#[from] ParseError),

    #[error("connection closed mid-request")]
    UnexpectedEof,

    #[error("request exceeds {0} bytes")]
    BufferFull(usize),
}

/// One connected client.
pub struct Connection {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.opened();
        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            handler,
            stats,
        }
    }

    /// Serves requests until the client leaves, sends `QUIT`, or sends
    /// something unparseable.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "Client connected");
        let result = self.serve().await;
        self.stats.closed();
        result
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            loop {
                let (args, used) = match parse_command(&self.buffer) {
                    Ok(Some(parsed)) => parsed,
                    Ok(None) => break,
                    Err(e) => {
                        self.write(&Frame::error(format!("ERR Protocol error: {}", e)))
                            .await?;
                        self.stream.flush().await?;
                        return Err(e.into());
                    }
                };
                self.buffer.advance(used);

                if args.is_empty() {
                    continue;
                }

                let Reply { frame, close } = self.handler.execute(&args);
                self.stats.commands_processed.fetch_add(1, Ordering::Relaxed);
                self.write(&frame).await?;

                if close {
                    self.stream.flush().await?;
                    return Ok(());
                }
            }

            self.stream.flush().await?;

            if !self.fill_buffer().await? {
                return Ok(());
            }
        }
    }

    /// Returns `false` on a clean end of stream.
    async fn fill_buffer(&mut self) -> Result<bool, ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            return Err(ConnectionError::BufferFull(MAX_BUFFER_SIZE));
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            return if self.buffer.is_empty() {
                Ok(false)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        trace!(client = %self.addr, bytes = n, "Read");
        Ok(true)
    }

    async fn write(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        let bytes = frame.encode();
        self.stream.write_all(&bytes).await?;
        self.stats
            .bytes_written
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Runs a [`Connection`] to completion, logging how it ended.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    match Connection::new(stream, addr, handler, stats).run().await {
        Ok(()) => debug!(client = %addr, "Client disconnected"),
        Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
            debug!(client = %addr, "Connection reset by client")
        }
        Err(e @ ConnectionError::Parse(_)) => warn!(client = %addr, error = %e, "Closing connection"),
        Err(e) => info!(client = %addr, error = %e, "Connection ended with error"),
    }
}
