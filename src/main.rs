//! dbgp - a small DBGp client for driving script debug engines
//!
//! Listens for an engine connection and sends it commands typed on stdin.

use clap::Parser;
use dbgp::common::logging;
use dbgp::{cli, commands::Commands};

#[derive(Parser)]
#[command(name = "dbgp", about = "DBGp debugger client")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    logging::init_cli();

    let cli = Cli::parse();

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
