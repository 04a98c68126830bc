//! Service layer for the registry

pub mod config;

pub use config::{ConfigService, DefaultConfigService};
