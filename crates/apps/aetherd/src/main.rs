//! aetherd: terminal front end for an aether chat node.
//!
//! Connects to the audio-medium emulator, joins the network, prints
//! delivered messages to stdout, and sends every stdin line as a chat
//! message.

mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use aether_node::{iface, Node, NodeError};

use crate::config::DaemonConfig;

#[derive(Debug, Parser)]
#[command(name = "aetherd", about = "aether ad-hoc chat node")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "aetherd.toml")]
    config: PathBuf,

    /// Override the emulator host.
    #[arg(long)]
    host: Option<String>,

    /// Override the emulator port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        DaemonConfig::from_path(&cli.config)
            .with_context(|| format!("reading {}", cli.config.display()))?
    } else {
        log::info!("no config at {}, using defaults", cli.config.display());
        DaemonConfig::default()
    };
    if let Some(host) = cli.host {
        config.emulator.host = host;
    }
    if let Some(port) = cli.port {
        config.emulator.port = port;
    }

    let addr = config.emulator_addr();
    log::info!("tuning to {} Hz via {addr}", config.emulator.frequency);

    let cancel = CancellationToken::new();
    let link = iface::connect(addr, cancel.clone());
    let (node, mut messages) = Node::start(link);

    println!("joining the network...");
    let joined = async {
        match config.node.join_timeout() {
            Some(limit) => tokio::time::timeout(limit, node.await_ready_to_send())
                .await
                .is_ok(),
            None => {
                node.await_ready_to_send().await;
                true
            }
        }
    };
    tokio::select! {
        _ = cancel.cancelled() => anyhow::bail!("medium connection ended before joining"),
        joined = joined => {
            if !joined {
                anyhow::bail!(
                    "did not join the network within {}s",
                    config.node.join_timeout_secs
                );
            }
        }
    }
    println!("ready as node {}", node.node_id());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = messages.recv() => {
                let Some(message) = message else { break };
                println!("<node {}> {}", message.sender, message.text);
            }
            line = stdin.next_line() => {
                match line.context("reading stdin")? {
                    Some(line) => {
                        let text = line.trim();
                        if text.is_empty() {
                            continue;
                        }
                        match node.send_chat_message(text) {
                            Ok(true) => {}
                            Ok(false) => println!("message too long, not sent"),
                            Err(NodeError::NotReady) => println!("still joining, try again"),
                            Err(err) => log::warn!("send failed: {err}"),
                        }
                    }
                    None => break,
                }
            }
        }
    }

    node.shutdown();
    Ok(())
}
