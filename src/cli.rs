use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "megadl",
    version,
    about = "Background downloader for public MEGA links"
)]
pub struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Path to the SQLite database
    #[arg(
        long,
        env = "MEGADL_DATABASE",
        default_value = "~/.megadl/megadl.db",
        global = true
    )]
    pub database: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// `serve` with defaults when no subcommand was given.
    pub fn effective_command(self) -> Command {
        self.command
            .unwrap_or_else(|| Command::Serve(ServeArgs::parse_from(["serve"])))
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the download processor and the HTTP API
    Serve(ServeArgs),

    /// Enqueue a link without a running daemon
    Add(AddArgs),

    /// Print link and file counts
    Status,

    /// List files whose download is missing on disk
    Verify,

    /// Print the canonical form of an encoded link
    Decode(DecodeArgs),
}

/// Also a standalone `Parser` so defaults can be built without a subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Directory downloads are written under
    #[arg(
        short = 'd',
        long,
        env = "MEGADL_DESTINATION",
        default_value = "~/Downloads/mega"
    )]
    pub destination: String,

    /// Address the HTTP API listens on
    #[arg(long, env = "MEGADL_LISTEN", default_value = "127.0.0.1:6543")]
    pub listen: String,

    /// Base URL of the link gateway
    #[arg(long, env = "MEGADL_GATEWAY", default_value = "http://127.0.0.1:6544")]
    pub gateway: String,

    /// Worker identifier stamped on claimed links (random if unset)
    #[arg(long, env = "MEGADL_WORKER_ID")]
    pub worker_id: Option<String>,

    /// Extra origin allowed by CORS
    #[arg(long, env = "MEGADL_CORS_DOMAIN")]
    pub cors_domain: Option<String>,

    /// Sleep between polls when there is no work, in milliseconds
    #[arg(long, default_value_t = 100)]
    pub idle_delay_ms: u64,

    /// Sleep after a failed iteration, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub error_backoff_ms: u64,

    /// Minimum gap between progress updates of a transfer, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub progress_interval_ms: u64,

    /// Seconds before a link with failed files is retried
    #[arg(long, default_value_t = 60)]
    pub incomplete_retry_secs: u64,

    /// Max retries for gateway calls and transfers
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Base retry delay in seconds
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// Send sd_notify READY/STATUS/STOPPING messages
    #[arg(long)]
    pub notify_systemd: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Link in any accepted encoding
    pub url: String,

    /// Category (destination sub-directory)
    #[arg(short = 'c', long)]
    pub category: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DecodeArgs {
    /// Encoded link
    pub input: String,
}
