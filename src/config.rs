//! Per-registry runtime settings
//!
//! Derived once from [`RegistryConfig`] when a registry is created and shared
//! read-only with every server instance it spawns.

use std::time::Duration;

use crate::models::config::{LspSettings, RegistryConfig, ServerRequestPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Request,
    Initialization,
    Shutdown,
}

impl OperationType {
    pub fn from_method(method: &str) -> Self {
        match method {
            "initialize" => Self::Initialization,
            "shutdown" => Self::Shutdown,
            _ => Self::Request,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request: Duration,
    pub initialize: Duration,
    /// Budget for the whole shutdown/exit sequence before a forced kill
    pub shutdown_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from(&LspSettings::default())
    }
}

impl From<&LspSettings> for Timeouts {
    fn from(settings: &LspSettings) -> Self {
        Self {
            request: Duration::from_millis(settings.request_timeout_ms),
            initialize: Duration::from_millis(settings.init_timeout_ms),
            shutdown_grace: Duration::from_millis(settings.shutdown_grace_ms),
        }
    }
}

impl Timeouts {
    pub fn timeout_for(&self, method: &str) -> Duration {
        match OperationType::from_method(method) {
            OperationType::Request => self.request,
            OperationType::Initialization => self.initialize,
            // shutdown shares the grace period with the exit wait
            OperationType::Shutdown => self.shutdown_grace / 2,
        }
    }
}

/// Settings handed to every client of one registry
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub timeouts: Timeouts,
    pub server_requests: ServerRequestPolicy,
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from(&RegistryConfig::default())
    }
}

impl From<&RegistryConfig> for RuntimeConfig {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            timeouts: Timeouts::from(&config.lsp),
            server_requests: config.lsp.server_requests,
            event_capacity: config.events.capacity,
        }
    }
}
