//! Command-line front end for the polymcp client runtime.
//!
//! Loads an `{"mcpServers": {...}}` configuration file and exposes the
//! four server-management operations plus a direct tool call. This binary
//! owns the process-wide tracing sink; the library crates only emit.

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use polymcp_client::{Client, ServerManager, ServersConfig};
use polymcp_protocol::ContentBlock;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

/// Parse arguments and execute one command.
pub async fn run() -> Result<()> {
    // Process-wide default sink, env-filtered (RUST_LOG); kept out of the
    // library crates
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let text = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("cannot read config file {}", cli.config.display()))?;
    let config = ServersConfig::from_json(&text)
        .with_context(|| format!("invalid config file {}", cli.config.display()))?;

    let client = Arc::new(Client::with_configs(config.mcp_servers));
    let manager = ServerManager::new(Arc::clone(&client));

    match cli.command {
        Command::List => println!("{}", manager.list_servers().await),
        Command::Connect { name } => println!("{}", manager.connect_to_server(&name).await),
        Command::Active => println!("{}", manager.get_active_server().await),
        Command::Disconnect => println!("{}", manager.disconnect_from_server().await),
        Command::Call {
            server,
            tool,
            args,
        } => {
            let arguments = match args {
                Some(text) => Some(
                    serde_json::from_str(&text).context("--args must be a JSON object")?,
                ),
                None => None,
            };

            let session = client
                .create_session(&server, true)
                .await
                .with_context(|| format!("cannot create session for '{server}'"))?;
            let result = session
                .call_tool(&tool, arguments)
                .await
                .with_context(|| format!("tool call '{tool}' on '{server}' failed"))?;

            for block in &result.content {
                match block {
                    ContentBlock::Text(text) => println!("{}", text.text),
                    ContentBlock::Image(image) => println!(
                        "[image{} - {} bytes base64]",
                        image
                            .mime_type
                            .as_deref()
                            .map(|m| format!(" {m}"))
                            .unwrap_or_default(),
                        image.data.len()
                    ),
                    ContentBlock::Resource(resource) => {
                        println!("[resource: {}]", serde_json::to_string(&resource.resource)?);
                    }
                }
            }
        }
    }

    // Leave no live child processes or sockets behind
    client.close_all_sessions().await;
    Ok(())
}
