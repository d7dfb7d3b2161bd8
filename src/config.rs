//! Runtime configuration.
//!
//! Values come from command-line flags, falling back to `SHORTN_*`
//! environment variables (a `.env` file is loaded first by the binary), then
//! to defaults. [`Config::try_from`] validates everything that can be checked
//! before startup.

use clap::Parser;

use crate::error::{Result, ShortnError};
use crate::id::{SnowflakeConfig, DEFAULT_EPOCH, DEFAULT_NODE_ID};
use crate::replication::{
    FailurePolicy, QueueConfig, DEFAULT_DEAD_LETTER_CAPACITY, DEFAULT_QUEUE_CAPACITY,
};
use crate::{DEFAULT_HOST, DEFAULT_PORT};

/// Command-line and environment inputs for the `shortn` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "shortn",
    version,
    about = "URL shortener speaking the Redis protocol"
)]
pub struct CliArgs {
    /// Host to bind to.
    #[arg(long, env = "SHORTN_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, env = "SHORTN_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Snowflake epoch as an RFC 3339 timestamp.
    ///
    /// Changing it after codes have been issued can produce duplicates.
    #[arg(long, env = "SHORTN_EPOCH", default_value = DEFAULT_EPOCH)]
    pub epoch: String,

    /// Snowflake node id (0-1023). Must differ between running instances.
    #[arg(long, env = "SHORTN_NODE_ID", default_value_t = DEFAULT_NODE_ID)]
    pub node_id: u16,

    /// Replication queue capacity; 0 means unbounded.
    #[arg(long, env = "SHORTN_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// What the consumer does with events it cannot apply:
    /// `drop`, `retry-N` or `dead-letter`.
    #[arg(long, env = "SHORTN_FAILURE_POLICY", default_value = "drop")]
    pub failure_policy: String,

    /// Entries kept by the dead-letter queue before the oldest is evicted.
    #[arg(long, env = "SHORTN_DEAD_LETTER_CAPACITY", default_value_t = DEFAULT_DEAD_LETTER_CAPACITY)]
    pub dead_letter_capacity: usize,

    /// Log filter directive, e.g. `info` or `shortn=debug`.
    #[arg(long, env = "SHORTN_LOG", default_value = "info")]
    pub log: String,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub snowflake: SnowflakeConfig,
    pub queue: QueueConfig,
    pub failure_policy: FailurePolicy,
    pub dead_letter_capacity: usize,
    pub log: String,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl TryFrom<CliArgs> for Config {
    type Error = ShortnError;

    fn try_from(args: CliArgs) -> Result<Self> {
        let snowflake = SnowflakeConfig {
            epoch: args.epoch,
            node_id: args.node_id,
        };
        snowflake.validate()?;

        let queue = QueueConfig::bounded(args.queue_capacity);
        queue.validate()?;

        let failure_policy: FailurePolicy = args.failure_policy.parse()?;

        if args.dead_letter_capacity == 0 {
            return Err(ShortnError::Configuration(
                "SHORTN_DEAD_LETTER_CAPACITY must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            host: args.host,
            port: args.port,
            snowflake,
            queue,
            failure_policy,
            dead_letter_capacity: args.dead_letter_capacity,
            log: args.log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config> {
        let cli = CliArgs::try_parse_from(std::iter::once("shortn").chain(args.iter().copied()))
            .map_err(|e| ShortnError::Configuration(e.to_string()))?;
        Config::try_from(cli)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.snowflake, SnowflakeConfig::default());
        assert_eq!(config.queue, QueueConfig::default());
        assert_eq!(config.failure_policy, FailurePolicy::Drop);
        assert_eq!(config.dead_letter_capacity, DEFAULT_DEAD_LETTER_CAPACITY);
        assert_eq!(config.bind_address(), format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT));
    }

    #[test]
    fn test_flags() {
        let config = parse(&[
            "--host",
            "0.0.0.0",
            "-p",
            "7000",
            "--node-id",
            "42",
            "--queue-capacity",
            "0",
            "--failure-policy",
            "retry-5",
        ])
        .unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:7000");
        assert_eq!(config.snowflake.node_id, 42);
        assert_eq!(config.queue, QueueConfig::unbounded());
        assert_eq!(config.failure_policy, FailurePolicy::Retry(5));
    }

    #[test]
    fn test_rejects_bad_values() {
        for args in [
            &["--epoch", "yesterday"][..],
            &["--node-id", "1024"][..],
            &["--failure-policy", "panic"][..],
            &["--dead-letter-capacity", "0"][..],
            &["--queue-capacity", "18446744073709551615"][..],
            &["--failure-policy", "retry-1000"][..],
        ] {
            assert!(
                matches!(parse(args), Err(ShortnError::Configuration(_))),
                "accepted {:?}",
                args
            );
        }
    }
}
