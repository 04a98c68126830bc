//! lsp-registry - command-line driver for the LSP registry
//!
//! Every command prints one JSON document. Logs go to stderr.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lsp_registry::cli::{Cli, Commands, OutputContext};

fn main() {
    let cli = Cli::parse();

    // Quiet defaults; use RUST_LOG=lsp_registry=debug for verbose output
    let default_filter = if cli.verbose {
        "lsp_registry=debug"
    } else {
        "lsp_registry=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();

    let ctx = OutputContext::new();
    if let Err(e) = execute_command(cli.command, &ctx) {
        // All errors are output as JSON for consistent consumption
        ctx.print_error(&e.to_string());
        std::process::exit(2);
    }
}

fn execute_command(command: Commands, ctx: &OutputContext) -> anyhow::Result<()> {
    use lsp_registry::cli::commands;

    match command {
        Commands::Status(args) => commands::status::execute(args, ctx),
        Commands::Request(args) => commands::request::execute(args, ctx),
        Commands::Config(args) => commands::config::execute(args, ctx),
    }
}
