//! Configuration loading
//!
//! One file per user; there is no project-level overlay because the
//! workspace root is a URI that may not exist locally.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::models::config::RegistryConfig;

/// Explicit config file override.
pub const CONFIG_ENV: &str = "LSP_REGISTRY_CONFIG";

pub trait ConfigService: Send + Sync {
    fn load(&self) -> Result<RegistryConfig, ConfigError>;
    fn config_path(&self) -> PathBuf;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultConfigService {
    path: Option<PathBuf>,
}

impl DefaultConfigService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a fixed path instead of the environment-derived one.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    fn global_config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        // XDG standard: ~/.config/lsp-registry/config.toml
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lsp-registry")
            .join("config.toml")
    }

    fn load_from_path(path: &Path) -> Result<RegistryConfig, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(RegistryConfig::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: RegistryConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }
}

impl ConfigService for DefaultConfigService {
    fn load(&self) -> Result<RegistryConfig, ConfigError> {
        Self::load_from_path(&self.config_path())
    }

    fn config_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(Self::global_config_path)
    }
}

/// Load the user configuration, falling back to defaults on any error.
pub fn load_or_default() -> RegistryConfig {
    let service = DefaultConfigService::new();
    match service.load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                "Ignoring config {}: {}",
                service.config_path().display(),
                e
            );
            RegistryConfig::default()
        }
    }
}
