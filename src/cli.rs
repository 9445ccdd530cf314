//! CLI definitions for Hourglass.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

/// Hourglass CLI.
#[derive(Parser)]
#[command(name = "hourglass")]
#[command(about = "Delayed message queue with at-least-once delivery")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "hourglass.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Enqueue one message
    Send {
        /// Queue name
        #[arg(short, long)]
        queue: String,

        /// Message payload
        #[arg(short, long)]
        payload: String,

        /// Deliver after this many seconds
        #[arg(long, default_value_t = 0, conflicts_with = "at")]
        delay_secs: u64,

        /// Deliver at an RFC 3339 timestamp
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Retry budget override
        #[arg(long)]
        retry: Option<u32>,

        /// Payload TTL override in seconds
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Run a consumer that logs and acknowledges every payload
    Consume {
        /// Queue name
        #[arg(short, long)]
        queue: String,

        /// Publish lifecycle events for monitors
        #[arg(long)]
        report: bool,

        /// Log queue sizes every N seconds (0 disables)
        #[arg(long, default_value_t = 0)]
        stats_interval_secs: u64,
    },

    /// Print the size of every pipeline stage
    Stats {
        /// Queue name
        #[arg(short, long)]
        queue: String,

        /// Print as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Follow the event stream of a reporting queue
    Watch {
        /// Queue name
        #[arg(short, long)]
        queue: String,

        /// Print metrics every N seconds
        #[arg(long, default_value_t = 10)]
        interval_secs: u64,
    },
}
