use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "mcp-gateway", version, about = "A small MCP-aware API gateway")]
pub struct Args {
    /// Directory of config documents (`*.yaml`/`*.yml`/`*.json`). May be
    /// repeated; all directories are read and merged into one snapshot.
    #[arg(long = "config-dir", required = true)]
    pub config_dirs: Vec<PathBuf>,

    /// Public listener address.
    #[arg(long, default_value = "0.0.0.0:3000")]
    pub addr: SocketAddr,

    /// Internal listener address (health checks, `/_reload`).
    #[arg(long = "internal-addr", default_value = "127.0.0.1:3001")]
    pub internal_addr: SocketAddr,

    /// Write the process id to this file at startup, remove it at exit.
    #[arg(long = "pid-file")]
    pub pid_file: Option<PathBuf>,

    /// Emit structured JSON logs instead of the human-readable format.
    #[arg(long = "log-json")]
    pub log_json: bool,

    /// redis URL for the shared (multi-replica) session store. Omit to use
    /// the in-process store, which only makes sense for a single replica.
    #[arg(long = "session-redis-url")]
    pub session_redis_url: Option<String>,
}
