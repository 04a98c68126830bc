//! CLI module for lsp-registry
//!
//! Provides command-line interface using clap derive macros.

pub mod commands;
pub mod output;

pub use output::OutputContext;

use clap::{Parser, Subcommand};

use commands::{config::ConfigArgs, request::RequestArgs, status::StatusArgs};

const LONG_ABOUT: &str = r#"
lsp-registry - drive language servers from the command line

Starts the configured language server for a workspace, performs one LSP
request and prints the raw JSON result.

EXAMPLES:
  lsp-registry status
  lsp-registry request --root file:///proj --language python \
      --file file:///proj/a.py --method textDocument/hover \
      --params '{"textDocument":{"uri":"file:///proj/a.py"},"position":{"line":0,"character":0}}'
  lsp-registry config path

Servers are configured in ~/.config/lsp-registry/config.toml
(override with LSP_REGISTRY_CONFIG).
"#;

/// lsp-registry - supervised language servers behind one interface
#[derive(Parser, Debug)]
#[command(name = "lsp-registry")]
#[command(author, version, about, long_about = LONG_ABOUT)]
#[command(propagate_version = true)]
#[command(
    after_help = "Use 'lsp-registry <COMMAND> --help' for more information about a command."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output (show debug info)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show installation status of configured language servers
    Status(StatusArgs),

    /// Start a server and send one request
    Request(RequestArgs),

    /// Configuration management
    Config(ConfigArgs),
}
