//! shortn server entry point.
//!
//! Wires the pipeline together, starts the replication consumer and the
//! expiry sweeper, then accepts RESP clients until Ctrl+C.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use shortn::codec::Base62Encoder;
use shortn::commands::{CommandHandler, ServerState};
use shortn::config::{CliArgs, Config};
use shortn::connection::{handle_connection, ConnectionStats};
use shortn::id::SnowflakeGenerator;
use shortn::replication::{channel, DeadLetterQueue, ReplicationConsumer};
use shortn::shortener::Shortener;
use shortn::storage::{start_expiry_sweeper, StorageEngine};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::try_from(CliArgs::parse()).context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!(
        version = shortn::VERSION,
        node_id = config.snowflake.node_id,
        epoch = %config.snowflake.epoch,
        policy = %config.failure_policy,
        queue_capacity = config.queue.capacity,
        "Starting shortn"
    );

    let generator =
        SnowflakeGenerator::new(&config.snowflake).context("cannot build id generator")?;

    let storage = Arc::new(StorageEngine::new());
    let _sweeper = start_expiry_sweeper(Arc::clone(&storage));

    let (producer, receiver) = channel(config.queue);
    let consumer = ReplicationConsumer::new(receiver, storage.clone())
        .with_policy(config.failure_policy)
        .with_dead_letter_queue(Arc::new(DeadLetterQueue::new(config.dead_letter_capacity)));

    let connections = Arc::new(ConnectionStats::new());
    let handler = CommandHandler::new(
        Shortener::new(
            Arc::new(generator),
            Arc::new(Base62Encoder),
            Arc::new(producer.clone()),
            storage.clone(),
        ),
        ServerState {
            storage,
            producer,
            consumer: consumer.stats(),
            dead_letters: consumer.dead_letters(),
            connections: Arc::clone(&connections),
        },
    );

    // Not supervised: if this task dies, issued codes stop becoming resolvable.
    let _worker = consumer.spawn();

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("cannot bind {}", config.bind_address()))?;
    info!("Listening on {}", config.bind_address());

    tokio::select! {
        _ = accept_loop(listener, handler, connections) => {}
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("Shutdown signal received");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn accept_loop(listener: TcpListener, handler: CommandHandler, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    handler.clone(),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => error!("Failed to accept connection: {}", e),
        }
    }
}
