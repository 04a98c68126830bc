//! LSP infrastructure for the registry
//!
//! Provides race-safe Language Server Protocol communication:
//! - JSON-RPC 2.0 protocol types
//! - Content-Length framing over child process pipes
//! - Per-instance request correlation with atomic ids and timeouts
//! - A bounded registry-wide event queue
//! - Server manager for multiple language servers

pub mod client;
pub mod events;
pub mod manager;
pub mod protocol;
pub mod router;
pub mod servers;
pub mod transport;

pub use client::LspClient;
pub use events::EventQueue;
pub use manager::{LspManager, ServerSnapshot};
pub use router::{CloseReason, RequestRouter};
pub use servers::{ServerInstallStatus, installation_status};
