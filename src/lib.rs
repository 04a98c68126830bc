//! LSP Registry - supervised language servers behind a blocking API
//!
//! Spawns one Language Server Protocol backend per language identifier,
//! speaks Content-Length framed JSON-RPC with each of them, correlates
//! requests with responses and buffers everything the servers push in a
//! single pull-based event queue. [`Registry`] is the Rust entry point;
//! [`ffi`] exposes the same operations over a C ABI.

pub mod cli;
pub mod config;
pub mod error;
pub mod ffi;
pub mod infra;
pub mod models;
pub mod registry;
pub mod services;

pub use error::{LspError, RegistryError, RegistryResult};
pub use models::{Event, EventKind, RegistryConfig, ServerState};
pub use registry::Registry;
