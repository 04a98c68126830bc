//! Data models for the LSP registry
//!
//! Contains core type definitions used throughout the crate.

pub mod config;
pub mod event;
pub mod state;
pub mod workspace;

pub use config::{EventSettings, LspSettings, RegistryConfig, ServerConfig, ServerRequestPolicy};
pub use event::{Event, EventKind};
pub use state::ServerState;
pub use workspace::WorkspaceRoot;
