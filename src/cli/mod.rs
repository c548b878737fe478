pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::LogFormat;
use crate::registry::REGISTRY_PATH_ENV;

#[derive(Parser)]
#[command(name = "dev-registry")]
#[command(about = "Discover and proxy between local Workers dev sessions")]
#[command(version)]
pub struct Cli {
    /// Registry directory (defaults to the per-user registry)
    #[arg(long, global = true, env = REGISTRY_PATH_ENV)]
    pub registry: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered sessions
    List(ListArgs),
    /// Resolve a worker entrypoint to its address
    Resolve(ResolveArgs),
    /// Send one request through a service binding
    Fetch(FetchArgs),
    /// Stream a worker's tail events
    Tail(TailArgs),
    /// Run a session fronting a local runtime
    Serve(ServeArgs),
}

#[derive(clap::Args)]
pub struct ListArgs {
    /// Print descriptors as JSON
    #[arg(long)]
    pub json: bool,

    /// Hide sessions whose heartbeat is older than this many seconds
    #[arg(long)]
    pub stale_after: Option<u64>,
}

#[derive(clap::Args)]
pub struct ResolveArgs {
    /// Worker name
    pub worker: String,

    /// Named entrypoint (default entrypoint if omitted)
    #[arg(long)]
    pub entrypoint: Option<String>,
}

#[derive(clap::Args)]
pub struct FetchArgs {
    /// Service (worker) name
    pub service: String,

    /// Request path and query
    #[arg(default_value = "/")]
    pub path: String,

    /// Named entrypoint (default entrypoint if omitted)
    #[arg(long)]
    pub entrypoint: Option<String>,

    /// HTTP method
    #[arg(long, short = 'X', default_value = "GET")]
    pub method: String,

    /// Request body
    #[arg(long, short = 'd')]
    pub data: Option<String>,

    /// Extra request header, `name: value`
    #[arg(long = "header", short = 'H')]
    pub headers: Vec<String>,
}

#[derive(clap::Args)]
pub struct TailArgs {
    /// Worker whose events to stream
    pub worker: String,

    /// Poll interval in milliseconds
    #[arg(long, default_value = "500")]
    pub interval: u64,
}

#[derive(clap::Args)]
pub struct ServeArgs {
    /// Path to the session config
    #[arg(long, default_value = crate::config::CONFIG_FILENAME)]
    pub config: PathBuf,
}
