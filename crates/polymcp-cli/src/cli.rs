//! Argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Manage and invoke MCP servers from a shared configuration file.
#[derive(Debug, Parser)]
#[command(name = "polymcp", version, about)]
pub struct Cli {
    /// Path to the servers configuration file
    #[arg(short, long, env = "POLYMCP_CONFIG", default_value = "mcp_servers.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List configured servers with their tools
    List,
    /// Make a server the active invocation target
    Connect {
        /// Server name from the configuration file
        name: String,
    },
    /// Show the active server
    Active,
    /// Clear the active-server selection
    Disconnect,
    /// Call a tool on a server
    Call {
        /// Server name from the configuration file
        server: String,
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },
}
