//! Configuration model for the LSP registry
//!
//! Every section is optional in the TOML file; missing keys fall back to
//! the defaults below.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryConfig {
    #[serde(default)]
    pub lsp: LspSettings,

    #[serde(default)]
    pub events: EventSettings,

    /// Per-language backend overrides, merged over the built-in table
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

impl RegistryConfig {
    /// Built-in servers with user entries layered on top.
    pub fn server_table(&self) -> BTreeMap<String, ServerConfig> {
        let mut table = crate::infra::lsp::servers::defaults();
        for (language, server) in &self.servers {
            table.insert(language.clone(), server.clone());
        }
        table
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lsp.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "lsp.request_timeout_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.lsp.init_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "lsp.init_timeout_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.lsp.shutdown_grace_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "lsp.shutdown_grace_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.events.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "events.capacity".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if let Some((language, _)) = self.servers.iter().find(|(_, s)| s.command.is_empty()) {
            return Err(ConfigError::InvalidValue {
                key: format!("servers.{}.command", language),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Timeouts and protocol behaviour shared by every server of a registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LspSettings {
    #[serde(default = "defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "defaults::init_timeout_ms")]
    pub init_timeout_ms: u64,

    #[serde(default = "defaults::shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default)]
    pub server_requests: ServerRequestPolicy,
}

impl Default for LspSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: defaults::request_timeout_ms(),
            init_timeout_ms: defaults::init_timeout_ms(),
            shutdown_grace_ms: defaults::shutdown_grace_ms(),
            server_requests: ServerRequestPolicy::default(),
        }
    }
}

/// How requests initiated by a backend (`workspace/configuration`,
/// `client/registerCapability`, ...) are answered. They are queued as
/// events regardless of the policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerRequestPolicy {
    /// Reply with an empty/default result so the backend never stalls
    #[default]
    DefaultReply,
    /// Reply with JSON-RPC `MethodNotFound`
    MethodNotFound,
    /// Send no reply at all
    Ignore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    /// Maximum buffered events; the oldest are dropped beyond this
    #[serde(default = "defaults::event_capacity")]
    pub capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            capacity: defaults::event_capacity(),
        }
    }
}

/// How to launch the backend for one language identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_options: Option<Value>,
}

impl ServerConfig {
    pub fn new(command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
            initialization_options: None,
        }
    }
}

mod defaults {
    pub fn request_timeout_ms() -> u64 {
        30_000
    }
    pub fn init_timeout_ms() -> u64 {
        45_000
    }
    pub fn shutdown_grace_ms() -> u64 {
        5_000
    }
    pub fn event_capacity() -> usize {
        4096
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.lsp.request_timeout_ms, 30_000);
        assert_eq!(config.lsp.init_timeout_ms, 45_000);
        assert_eq!(config.lsp.shutdown_grace_ms, 5_000);
        assert_eq!(config.lsp.server_requests, ServerRequestPolicy::DefaultReply);
        assert_eq!(config.events.capacity, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RegistryConfig = toml::from_str(
            r#"
            [lsp]
            request_timeout_ms = 500
            server_requests = "method_not_found"

            [servers.python]
            command = "pylsp"
            "#,
        )
        .unwrap();
        assert_eq!(config.lsp.request_timeout_ms, 500);
        assert_eq!(config.lsp.init_timeout_ms, 45_000);
        assert_eq!(config.lsp.server_requests, ServerRequestPolicy::MethodNotFound);
        assert!(config.servers["python"].args.is_empty());
    }

    #[test]
    fn test_user_servers_override_builtins() {
        let mut config = RegistryConfig::default();
        config
            .servers
            .insert("python".to_string(), ServerConfig::new("pylsp", &[]));
        config
            .servers
            .insert("zig".to_string(), ServerConfig::new("zls", &[]));

        let table = config.server_table();
        assert_eq!(table["python"].command, "pylsp");
        assert_eq!(table["zig"].command, "zls");
        assert_eq!(table["rust"].command, "rust-analyzer");
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = RegistryConfig::default();
        config.events.capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "events.capacity"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_shutdown_grace() {
        let mut config = RegistryConfig::default();
        config.lsp.shutdown_grace_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "lsp.shutdown_grace_ms"
        ));
    }
}
