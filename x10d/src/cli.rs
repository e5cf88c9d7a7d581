//! Command-line surface, layered on top of the INI config file.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "x10d", about = "X10 powerline automation daemon", version)]
pub struct Cli {
    /// Path to the daemon's INI configuration file.
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override the FIFO path configured for the command server.
    #[arg(long)]
    pub fifo: Option<PathBuf>,

    /// Override the configured log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Validate configuration and interface construction, then exit
    /// without running the event loop.
    #[arg(long)]
    pub check: bool,
}
