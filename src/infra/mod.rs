//! Infrastructure layer for the registry
//!
//! Contains the process, transport and protocol plumbing.

pub mod lsp;
