//! Command dispatch.
//!
//! | Command          | Reply                                          |
//! |------------------|------------------------------------------------|
//! | `SHORTEN url`    | bulk code, or `-ERR` on bad input / full queue |
//! | `RESOLVE code`   | bulk url, or null when absent                  |
//! | `DELETE code`    | `:1` when removed, `:0` when absent            |
//! | `DEADLETTERS`    | parked events as `[payload, reason, time]`     |
//! | `PING [msg]`     | `+PONG` or the message                         |
//! | `INFO`           | bulk text with client, storage and replication counters |
//! | `QUIT`           | `+OK`, then the connection closes              |
//!
//! "Absent" includes codes that were issued but not yet replicated.
//!
//! `DEADLETTERS` removes what it returns. Replaying a parked payload is up
//! to the operator.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info};

use crate::connection::ConnectionStats;
use crate::error::ShortnError;
use crate::protocol::Frame;
use crate::replication::{ChannelProducer, ConsumerStats, DeadLetterQueue};
use crate::shortener::Shortener;
use crate::storage::StorageEngine;

/// What to send back, and whether to hang up afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub frame: Frame,
    pub close: bool,
}

impl From<Frame> for Reply {
    fn from(frame: Frame) -> Self {
        Self {
            frame,
            close: false,
        }
    }
}

/// Shared components the server commands read from.
#[derive(Debug, Clone)]
pub struct ServerState {
    pub storage: Arc<StorageEngine>,
    pub producer: ChannelProducer,
    pub consumer: Arc<ConsumerStats>,
    pub dead_letters: Arc<DeadLetterQueue>,
    pub connections: Arc<ConnectionStats>,
}

/// Executes parsed commands. Cloned once per connection.
#[derive(Clone)]
pub struct CommandHandler {
    shortener: Shortener,
    state: ServerState,
    start_time: Instant,
}

impl CommandHandler {
    pub fn new(shortener: Shortener, state: ServerState) -> Self {
        Self {
            shortener,
            state,
            start_time: Instant::now(),
        }
    }

    pub fn execute(&self, args: &[Bytes]) -> Reply {
        let Some((name, rest)) = args.split_first() else {
            return Frame::error("ERR empty command").into();
        };
        let name = String::from_utf8_lossy(name).to_ascii_uppercase();

        match name.as_str() {
            "SHORTEN" => self.cmd_shorten(rest),
            "RESOLVE" => self.cmd_resolve(rest),
            "DELETE" | "DEL" => self.cmd_delete(rest),
            "DEADLETTERS" => self.cmd_dead_letters(rest),
            "PING" => cmd_ping(rest),
            "INFO" => self.cmd_info(),
            "QUIT" => Reply {
                frame: Frame::ok(),
                close: true,
            },
            _ => Frame::error(format!("ERR unknown command '{}'", name)).into(),
        }
    }

    fn cmd_shorten(&self, args: &[Bytes]) -> Reply {
        let url = match single_text_arg("SHORTEN", args) {
            Ok(url) => url,
            Err(reply) => return reply,
        };
        match self.shortener.shorten(url) {
            Ok(code) => Frame::bulk(code).into(),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_resolve(&self, args: &[Bytes]) -> Reply {
        let code = match single_text_arg("RESOLVE", args) {
            Ok(code) => code,
            Err(reply) => return reply,
        };
        match self.shortener.resolve(code) {
            Ok(url) => Frame::bulk(url).into(),
            Err(err) if err.is_not_found() => Frame::Null.into(),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_delete(&self, args: &[Bytes]) -> Reply {
        let code = match single_text_arg("DELETE", args) {
            Ok(code) => code,
            Err(reply) => return reply,
        };
        match self.shortener.delete(code) {
            Ok(()) => Frame::Integer(1).into(),
            Err(err) if err.is_not_found() => Frame::Integer(0).into(),
            Err(err) => error_reply(&err),
        }
    }

    fn cmd_dead_letters(&self, args: &[Bytes]) -> Reply {
        if !args.is_empty() {
            return Frame::error("ERR wrong number of arguments for 'DEADLETTERS' command").into();
        }

        let parked = self.state.dead_letters.drain();
        if !parked.is_empty() {
            info!(count = parked.len(), "Dead-letter queue drained");
        }

        Frame::Array(
            parked
                .into_iter()
                .map(|letter| {
                    Frame::Array(vec![
                        Frame::Bulk(letter.payload),
                        Frame::bulk(letter.reason.to_string()),
                        Frame::bulk(letter.failed_at.to_rfc3339()),
                    ])
                })
                .collect(),
        )
        .into()
    }

    fn cmd_info(&self) -> Reply {
        let clients = &self.state.connections;
        let storage = self.state.storage.stats();
        let consumer = self.state.consumer.snapshot();

        let info = format!(
            "# Server\r\n\
             shortn_version:{}\r\n\
             uptime_in_seconds:{}\r\n\
             \r\n\
             # Clients\r\n\
             connected_clients:{}\r\n\
             total_connections_received:{}\r\n\
             total_commands_processed:{}\r\n\
             total_net_input_bytes:{}\r\n\
             total_net_output_bytes:{}\r\n\
             \r\n\
             # Storage\r\n\
             keys:{}\r\n\
             get_ops:{}\r\n\
             put_ops:{}\r\n\
             del_ops:{}\r\n\
             expired_keys:{}\r\n\
             \r\n\
             # Replication\r\n\
             events_published:{}\r\n\
             events_received:{}\r\n\
             events_applied:{}\r\n\
             events_dropped:{}\r\n\
             events_retried:{}\r\n\
             events_dead_lettered:{}\r\n\
             receive_errors:{}\r\n\
             dead_letter_queue_len:{}\r\n\
             dead_letter_queue_capacity:{}\r\n",
            crate::VERSION,
            self.start_time.elapsed().as_secs(),
            clients.active_connections.load(Ordering::Relaxed),
            clients.connections_accepted.load(Ordering::Relaxed),
            clients.commands_processed.load(Ordering::Relaxed),
            clients.bytes_read.load(Ordering::Relaxed),
            clients.bytes_written.load(Ordering::Relaxed),
            storage.keys,
            storage.get_ops,
            storage.put_ops,
            storage.del_ops,
            storage.expired,
            self.state.producer.published(),
            consumer.received,
            consumer.applied,
            consumer.dropped,
            consumer.retried,
            consumer.dead_lettered,
            consumer.receive_errors,
            self.state.dead_letters.len(),
            self.state.dead_letters.capacity(),
        );

        Frame::bulk(info).into()
    }
}

fn cmd_ping(args: &[Bytes]) -> Reply {
    match args.first() {
        Some(msg) => Frame::Bulk(msg.clone()).into(),
        None => Frame::simple("PONG").into(),
    }
}

fn single_text_arg<'a>(command: &str, args: &'a [Bytes]) -> Result<&'a str, Reply> {
    let [arg] = args else {
        return Err(Frame::error(format!(
            "ERR wrong number of arguments for '{}' command",
            command
        ))
        .into());
    };
    std::str::from_utf8(arg).map_err(|_| Frame::error("ERR argument is not valid UTF-8").into())
}

fn error_reply(err: &ShortnError) -> Reply {
    debug!(error = %err, "Command failed");
    Frame::error(format!("ERR {}", err)).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Base62Encoder;
    use crate::id::{SnowflakeConfig, SnowflakeGenerator};
    use crate::replication::{channel, EventReceiver, QueueConfig, ReplicationEvent};
    use crate::storage::{UrlStore, MAPPING_TTL};

    struct Harness {
        handler: CommandHandler,
        storage: Arc<StorageEngine>,
        dead_letters: Arc<DeadLetterQueue>,
        receiver: crate::replication::ChannelReceiver,
    }

    fn harness(queue: QueueConfig) -> Harness {
        let storage = Arc::new(StorageEngine::new());
        let (producer, receiver) = channel(queue);
        let dead_letters = Arc::new(DeadLetterQueue::new(16));
        let shortener = Shortener::new(
            Arc::new(SnowflakeGenerator::new(&SnowflakeConfig::default()).unwrap()),
            Arc::new(Base62Encoder),
            Arc::new(producer.clone()),
            storage.clone(),
        );
        let handler = CommandHandler::new(
            shortener,
            ServerState {
                storage: storage.clone(),
                producer,
                consumer: Arc::new(ConsumerStats::new()),
                dead_letters: dead_letters.clone(),
                connections: Arc::new(ConnectionStats::new()),
            },
        );
        Harness {
            handler,
            storage,
            dead_letters,
            receiver,
        }
    }

    fn run(handler: &CommandHandler, args: &[&str]) -> Frame {
        let args: Vec<Bytes> = args
            .iter()
            .map(|a| Bytes::copy_from_slice(a.as_bytes()))
            .collect();
        handler.execute(&args).frame
    }

    #[tokio::test]
    async fn test_shorten_publishes() {
        let mut h = harness(QueueConfig::default());

        let code = match run(&h.handler, &["SHORTEN", "http://example.com"]) {
            Frame::Bulk(code) => String::from_utf8(code.to_vec()).unwrap(),
            other => panic!("unexpected reply {:?}", other),
        };

        let payload = h.receiver.receive().await.unwrap().unwrap();
        let event = ReplicationEvent::from_payload(&payload).unwrap();
        assert_eq!(event, ReplicationEvent::new(code, "http://example.com"));
    }

    #[test]
    fn test_resolve_and_delete() {
        let h = harness(QueueConfig::default());
        UrlStore::put(&*h.storage, "0z", "http://example.com", MAPPING_TTL).unwrap();

        assert_eq!(
            run(&h.handler, &["resolve", "0z"]),
            Frame::bulk("http://example.com")
        );
        assert_eq!(run(&h.handler, &["DELETE", "0z"]), Frame::Integer(1));
        assert_eq!(run(&h.handler, &["DELETE", "0z"]), Frame::Integer(0));
        assert_eq!(run(&h.handler, &["RESOLVE", "0z"]), Frame::Null);
    }

    #[test]
    fn test_unknown_code_is_null() {
        let h = harness(QueueConfig::default());
        assert_eq!(run(&h.handler, &["RESOLVE", "doesnotexist"]), Frame::Null);
    }

    #[test]
    fn test_validation_errors() {
        let h = harness(QueueConfig::default());
        assert!(run(&h.handler, &["SHORTEN", ""]).is_error());
        assert!(run(&h.handler, &["RESOLVE", ""]).is_error());
        assert!(run(&h.handler, &["RESOLVE", "no/such"]).is_error());
        assert!(run(&h.handler, &["DELETE", "a b"]).is_error());
    }

    #[test]
    fn test_arity_errors() {
        let h = harness(QueueConfig::default());
        for args in [
            &["SHORTEN"][..],
            &["SHORTEN", "a", "b"][..],
            &["RESOLVE"][..],
            &["DELETE", "a", "b"][..],
        ] {
            match run(&h.handler, args) {
                Frame::Error(msg) => assert!(msg.contains("wrong number of arguments")),
                other => panic!("unexpected reply {:?}", other),
            }
        }
    }

    #[test]
    fn test_full_queue_surfaces_error() {
        let h = harness(QueueConfig::bounded(1));
        assert!(matches!(
            run(&h.handler, &["SHORTEN", "http://a.example"]),
            Frame::Bulk(_)
        ));
        match run(&h.handler, &["SHORTEN", "http://b.example"]) {
            Frame::Error(msg) => assert!(msg.starts_with("ERR publish error")),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_server_commands() {
        let h = harness(QueueConfig::default());
        assert_eq!(run(&h.handler, &["PING"]), Frame::simple("PONG"));
        assert_eq!(run(&h.handler, &["ping", "hi"]), Frame::bulk("hi"));

        let quit = h.handler.execute(&[Bytes::from_static(b"QUIT")]);
        assert!(quit.close);
        assert_eq!(quit.frame, Frame::ok());

        assert!(run(&h.handler, &["SET", "k", "v"]).is_error());
        assert!(h.handler.execute(&[]).frame.is_error());
    }

    #[test]
    fn test_info_reports_counters() {
        let h = harness(QueueConfig::default());
        UrlStore::put(&*h.storage, "a", "http://a.example", MAPPING_TTL).unwrap();
        run(&h.handler, &["RESOLVE", "a"]);

        let info = run(&h.handler, &["INFO"]);
        let text = info.as_str().unwrap();
        assert!(text.contains("keys:1\r\n"));
        assert!(text.contains("get_ops:1\r\n"));
        assert!(text.contains("events_applied:0\r\n"));
        assert!(text.contains("dead_letter_queue_len:0\r\n"));
        assert!(text.contains("dead_letter_queue_capacity:16\r\n"));
        assert!(text.contains("connected_clients:0\r\n"));
    }

    #[test]
    fn test_info_counts_published_events() {
        let h = harness(QueueConfig::default());
        run(&h.handler, &["SHORTEN", "http://a.example"]);
        run(&h.handler, &["SHORTEN", "http://b.example"]);

        let info = run(&h.handler, &["INFO"]);
        assert!(info.as_str().unwrap().contains("events_published:2\r\n"));
    }

    #[test]
    fn test_dead_letters_drained() {
        let h = harness(QueueConfig::default());
        assert_eq!(run(&h.handler, &["DEADLETTERS"]), Frame::Array(vec![]));

        h.dead_letters.push(
            Bytes::from_static(b"{garbage"),
            ShortnError::Serialization("expected value".into()),
        );

        match run(&h.handler, &["deadletters"]) {
            Frame::Array(items) => {
                assert_eq!(items.len(), 1);
                let Frame::Array(fields) = &items[0] else {
                    panic!("unexpected entry {:?}", items[0]);
                };
                assert_eq!(fields[0], Frame::bulk("{garbage"));
                assert!(fields[1].as_str().unwrap().contains("expected value"));
                assert!(fields[2].as_str().is_some());
            }
            other => panic!("unexpected reply {:?}", other),
        }

        assert!(h.dead_letters.is_empty());
        assert!(run(&h.handler, &["DEADLETTERS", "now"]).is_error());
    }
}
