//! Config command implementation

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::cli::OutputContext;
use crate::services::{ConfigService, DefaultConfigService};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show config file path
    Path,

    /// Show effective configuration (defaults merged with the file)
    Show,
}

#[derive(Serialize)]
struct ConfigPathResponse {
    path: String,
    exists: bool,
}

pub fn execute(args: ConfigArgs, ctx: &OutputContext) -> Result<()> {
    let service = DefaultConfigService::new();

    match args.command {
        ConfigCommand::Path => {
            let path = service.config_path();
            ctx.print_success(ConfigPathResponse {
                exists: path.exists(),
                path: path.display().to_string(),
            });
        }
        ConfigCommand::Show => {
            let config = service.load()?;
            ctx.print_success(serde_json::json!({
                "lsp": config.lsp,
                "events": config.events,
                "servers": config.server_table(),
            }));
        }
    }
    Ok(())
}
