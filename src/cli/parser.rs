//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};

/// Default bind host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default bind port.
pub const DEFAULT_PORT: u16 = 8000;

/// chatgraph: graph-orchestrated conversational AI backend.
#[derive(Parser, Debug)]
#[command(name = "chatgraph")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API server.
    #[command(after_help = r"Examples:
  chatgraph serve                       # Bind 127.0.0.1:8000
  chatgraph serve --port 9000           # Custom port
  CHATGRAPH_HOST=0.0.0.0 chatgraph serve
")]
    Serve {
        /// Host to bind.
        #[arg(long, env = "CHATGRAPH_HOST", default_value = DEFAULT_HOST)]
        host: String,

        /// Port to bind.
        #[arg(short, long, env = "CHATGRAPH_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Print the resolved configuration (keys redacted) and exit.
    Check,
}
