//! Mock engine binary
//!
//! Runs a YAML-scripted program under the debug engine and connects to a
//! listening DBGp client, the way an interpreter started with `/Debug`
//! would. Used to try out clients (including `dbgp listen`) without a
//! real interpreter.

use std::path::PathBuf;

use clap::Parser;
use dbgp::common::{config::Config, logging, Result};
use dbgp::engine::{Session, SessionSettings};
use dbgp::testing::{Program, ScriptRunner};

#[derive(Parser)]
#[command(name = "mock_engine", about = "Run a scripted program under the DBGp engine")]
struct Args {
    /// YAML program to run
    program: PathBuf,

    /// Client address (default: from config)
    #[arg(long)]
    host: Option<String>,

    /// Client port (default: from config, normally 9000)
    #[arg(long, short)]
    port: Option<u16>,
}

fn run(args: Args) -> Result<bool> {
    let mut config = Config::load()?;
    if let Some(host) = args.host {
        config.engine.host = host;
    }
    if let Some(port) = args.port {
        config.engine.port = port;
    }

    let program = Program::load(&args.program)?;
    tracing::info!(program = %program.name, script = %program.script.display(), "Starting program");

    let mut session = Session::connect(
        &config.engine.host,
        config.engine.port,
        SessionSettings::from(&config),
    )?;
    let outcome = ScriptRunner::new(&program)
        .with_echo(true)
        .run(&mut session);

    if let Some(error) = &outcome.uncaught {
        tracing::warn!(error = %error, "Program ended with an uncaught exception");
    }
    Ok(outcome.uncaught.is_none())
}

fn main() {
    let log_file = logging::init_engine();
    if let Some(path) = log_file {
        tracing::debug!(path = %path.display(), "Engine log file");
    }

    match run(Args::parse()) {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
