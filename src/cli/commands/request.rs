//! Request command implementation
//!
//! Start one server, send one request, print the result and shut down.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use serde_json::Value;

use crate::cli::OutputContext;
use crate::infra::lsp::ServerSnapshot;
use crate::models::event::Event;
use crate::registry::{Registry, parse_params};
use crate::services::{ConfigService, DefaultConfigService};

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Workspace root URI (e.g. file:///home/me/project)
    #[arg(long)]
    pub root: String,

    /// LSP language identifier (e.g. rust, python)
    #[arg(short, long)]
    pub language: String,

    /// Document URI the request is about
    #[arg(short, long)]
    pub file: Option<String>,

    /// LSP method (e.g. textDocument/hover)
    #[arg(short, long)]
    pub method: String,

    /// Request params as JSON
    #[arg(short, long)]
    pub params: Option<String>,

    /// Include server events received while the command ran
    #[arg(long)]
    pub events: bool,

    /// Override the request timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Serialize)]
struct RequestResponse {
    language: String,
    method: String,
    result: Value,
    servers: Vec<ServerSnapshot>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    events: Vec<Event>,
    #[serde(skip_serializing_if = "is_zero")]
    events_dropped: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

pub fn execute(args: RequestArgs, ctx: &OutputContext) -> Result<()> {
    let mut config = DefaultConfigService::new().load()?;
    if let Some(timeout_ms) = args.timeout_ms {
        config.lsp.request_timeout_ms = timeout_ms;
    }

    let params = parse_params(args.params.as_deref())?;
    let file = args.file.as_deref().unwrap_or_default();
    let registry = Registry::with_config(&args.root, &config)?;

    let result = registry
        .ensure_servers(&args.language, file)
        .and_then(|()| registry.request(&args.language, file, &args.method, params));
    let servers = registry.snapshot();
    registry.close();

    let events: Vec<Event> = if args.events {
        std::iter::from_fn(|| registry.poll_event()).collect()
    } else {
        Vec::new()
    };
    tracing::debug!(
        "{} event(s) collected, {} left queued",
        events.len(),
        registry.pending_events()
    );

    ctx.print_success(RequestResponse {
        language: args.language,
        method: args.method,
        result: result?,
        servers,
        events,
        events_dropped: registry.events_dropped(),
    });
    Ok(())
}
