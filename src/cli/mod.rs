//! CLI command handling
//!
//! Dispatches CLI commands and formats engine output.

mod format;

use std::collections::HashSet;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::client::{DbgpClient, DbgpListener, Packet};
use crate::commands::Commands;
use crate::common::{config::Config, paths, Error, Result};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Listen {
            host,
            port,
            timeout,
            json,
        } => {
            let config = Config::load()?;
            let host = host.unwrap_or(config.client.listen_host);
            let port = port.unwrap_or(config.client.listen_port);

            let listener = DbgpListener::bind(&host, port).await?;
            println!("Listening on {} ...", listener.local_addr()?);

            let (mut client, init) =
                tokio::time::timeout(Duration::from_secs(timeout), listener.accept())
                    .await
                    .map_err(|_| Error::Timeout(timeout))??;
            if json {
                println!("{}", serde_json::to_string_pretty(&Packet::Init(init))?);
            } else {
                println!("{}", format::init(&init));
            }

            interact(&mut client, json).await
        }

        Commands::Config { init } => {
            if init {
                let dir = paths::ensure_config_dir()?
                    .ok_or_else(|| Error::Config("no configuration directory".to_string()))?;
                let path = dir.join("config.toml");
                if path.exists() {
                    println!("Config file already exists: {}", path.display());
                } else {
                    std::fs::write(&path, Config::default().to_toml()?)?;
                    println!("Wrote default config to {}", path.display());
                }
                return Ok(());
            }

            match paths::config_path() {
                Some(path) if path.exists() => println!("# {}", path.display()),
                Some(path) => println!("# {} (not found, using defaults)", path.display()),
                None => println!("# using defaults"),
            }
            print!("{}", Config::load()?.to_toml()?);
            Ok(())
        }
    }
}

/// Send stdin lines to the engine until it stops or goes away
///
/// Packets are printed as they arrive, so `break` can be typed while a
/// `run` is still waiting for the script.
async fn interact(client: &mut DbgpClient, json: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut pending = HashSet::new();

    loop {
        if !stdin_open && pending.is_empty() {
            return Ok(());
        }

        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        pending.insert(client.send(line).await?);
                    }
                }
                None => stdin_open = false,
            },
            packet = client.next_packet() => {
                let packet = match packet {
                    Ok(packet) => packet,
                    Err(Error::Disconnected) => {
                        println!("Engine disconnected");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                };
                let finished = match &packet {
                    Packet::Response(response) => {
                        pending.remove(&response.transaction_id);
                        matches!(response.command.as_str(), "stop" | "detach")
                    }
                    _ => false,
                };
                print_packet(packet, json)?;
                if finished {
                    return Ok(());
                }
            }
        }
    }
}

fn print_packet(packet: Packet, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&packet)?);
        return Ok(());
    }
    match &packet {
        Packet::Init(init) => println!("{}", format::init(init)),
        Packet::Response(response) => println!("{}", format::response(response)),
        Packet::Stream(stream) => println!("{}", format::stream(stream)),
        Packet::Other(element) => println!("{}", format::other(element)),
    }
    Ok(())
}
