//! Status command implementation
//!
//! Show which configured language servers are installed.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::OutputContext;
use crate::infra::lsp::servers::{ServerInstallStatus, installation_status};
use crate::services::{ConfigService, DefaultConfigService};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only list servers whose command is found on PATH
    #[arg(long)]
    pub installed: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    config_path: String,
    servers: Vec<ServerInstallStatus>,
}

pub fn execute(args: StatusArgs, ctx: &OutputContext) -> Result<()> {
    let service = DefaultConfigService::new();
    let config = service.load()?;

    let mut servers = installation_status(&config.server_table());
    if args.installed {
        servers.retain(|s| s.installed);
    }

    ctx.print_success(StatusResponse {
        config_path: service.config_path().display().to_string(),
        servers,
    });
    Ok(())
}
