use core::time::Duration;

use anyhow::bail;
use clap::{Parser, ValueEnum};
use snowcast::{
    MAX_BACKUP_COUNT, MAX_LOGICAL_NODE_COUNT, MIN_LOGICAL_NODE_COUNT,
    DEFAULT_MAX_LOGICAL_NODE_COUNT,
};

/// Output format of the log subscriber.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Multi-line, human readable.
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Runtime configuration for the `snowcast-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults suitable for a single-node
/// deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "snowcast-server",
    version,
    about = "An HTTP lease service for cluster-wide Snowflake sequencers"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Number of backup copies the lease store keeps for each sequencer.
    ///
    /// Attach requests asking for more backups than this are rejected.
    ///
    /// Environment variable: `BACKUP_CAPACITY`
    #[arg(long, env = "BACKUP_CAPACITY", default_value_t = 1)]
    pub backup_capacity: u16,

    /// Backup count used when an attach request does not name one.
    ///
    /// Environment variable: `DEFAULT_BACKUP_COUNT`
    #[arg(long, env = "DEFAULT_BACKUP_COUNT", default_value_t = 1)]
    pub default_backup_count: u32,

    /// Logical node count used when an attach request does not name one.
    ///
    /// Environment variable: `DEFAULT_MAX_LOGICAL_NODE_COUNT`
    #[arg(
        long,
        env = "DEFAULT_MAX_LOGICAL_NODE_COUNT",
        default_value_t = DEFAULT_MAX_LOGICAL_NODE_COUNT
    )]
    pub default_max_logical_node_count: u32,

    /// How long a session stays alive without a keepalive, in milliseconds.
    ///
    /// Leases of an expired session are released.
    ///
    /// Environment variable: `SESSION_TTL_MS`
    #[arg(long, env = "SESSION_TTL_MS", default_value_t = 30_000)]
    pub session_ttl_ms: u64,

    /// How often expired sessions are collected, in milliseconds.
    ///
    /// Environment variable: `REAP_INTERVAL_MS`
    #[arg(long, env = "REAP_INTERVAL_MS", default_value_t = 1_000)]
    pub reap_interval_ms: u64,

    /// Log output format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub backup_capacity: u16,
    pub default_backup_count: u32,
    pub default_max_logical_node_count: u32,
    pub session_ttl: Duration,
    pub reap_interval: Duration,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.default_backup_count > MAX_BACKUP_COUNT {
            bail!(
                "DEFAULT_BACKUP_COUNT ({}) exceeds the maximum of {}",
                args.default_backup_count,
                MAX_BACKUP_COUNT
            );
        }

        if args.default_backup_count > u32::from(args.backup_capacity) {
            bail!(
                "DEFAULT_BACKUP_COUNT ({}) exceeds BACKUP_CAPACITY ({})",
                args.default_backup_count,
                args.backup_capacity
            );
        }

        if !(MIN_LOGICAL_NODE_COUNT..=MAX_LOGICAL_NODE_COUNT)
            .contains(&args.default_max_logical_node_count)
        {
            bail!(
                "DEFAULT_MAX_LOGICAL_NODE_COUNT ({}) must be within {}..={}",
                args.default_max_logical_node_count,
                MIN_LOGICAL_NODE_COUNT,
                MAX_LOGICAL_NODE_COUNT
            );
        }

        if args.session_ttl_ms == 0 {
            bail!("SESSION_TTL_MS must be greater than 0");
        }

        if args.reap_interval_ms == 0 || args.reap_interval_ms > args.session_ttl_ms {
            bail!(
                "REAP_INTERVAL_MS ({}) must be within 1..={} (SESSION_TTL_MS)",
                args.reap_interval_ms,
                args.session_ttl_ms
            );
        }

        Ok(Self {
            server_addr: args.server_addr,
            backup_capacity: args.backup_capacity,
            default_backup_count: args.default_backup_count,
            default_max_logical_node_count: args.default_max_logical_node_count,
            session_ttl: Duration::from_millis(args.session_ttl_ms),
            reap_interval: Duration::from_millis(args.reap_interval_ms),
            log_format: args.log_format,
        })
    }
}
