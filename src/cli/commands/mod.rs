//! Command implementations for lsp-registry
//!
//! Each command is implemented in its own module.

pub mod config;
pub mod request;
pub mod status;
