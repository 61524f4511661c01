//! CLI command definitions
//!
//! Defines the clap commands for the `dbgp` CLI.

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Wait for an engine to connect and drive it interactively
    ///
    /// Each line read from stdin is sent as one DBGp command, e.g.
    /// `breakpoint_set -t line -f file:///a.ahk -n 10` or `run`. A
    /// transaction id is added when the line has none.
    Listen {
        /// Address to listen on (default: from config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (default: from config, normally 9000)
        #[arg(long, short)]
        port: Option<u16>,

        /// Seconds to wait for an engine to connect
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Output packets as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}
