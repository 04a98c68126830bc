//! Built-in Language Server Table
//!
//! Default backend per language identifier plus installation status checks.
//! The table is only a starting point; `[servers.<language>]` entries in the
//! configuration replace or extend it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::models::config::ServerConfig;

// ============================================================================
// Platform Detection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOS,
    Linux,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOS
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else {
            Self::Linux
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InstallInstructions {
    pub macos: &'static str,
    pub linux: &'static str,
    pub windows: &'static str,
}

impl InstallInstructions {
    const fn everywhere(hint: &'static str) -> Self {
        Self {
            macos: hint,
            linux: hint,
            windows: hint,
        }
    }

    pub fn current(&self) -> &'static str {
        match Platform::current() {
            Platform::MacOS => self.macos,
            Platform::Linux => self.linux,
            Platform::Windows => self.windows,
        }
    }
}

/// Install hint for the well-known backends.
pub fn install_instructions(command: &str) -> Option<InstallInstructions> {
    let instructions = match command {
        "rust-analyzer" => InstallInstructions::everywhere("rustup component add rust-analyzer"),
        "pyright-langserver" => InstallInstructions::everywhere("npm install -g pyright"),
        "clangd" => InstallInstructions {
            macos: "brew install llvm",
            linux: "apt install clangd",
            windows: "Download from https://clangd.llvm.org/installation",
        },
        "typescript-language-server" => InstallInstructions::everywhere(
            "npm install -g typescript-language-server typescript",
        ),
        "intelephense" => InstallInstructions::everywhere("npm install -g intelephense"),
        "gopls" => InstallInstructions::everywhere("go install golang.org/x/tools/gopls@latest"),
        _ => return None,
    };
    Some(instructions)
}

/// Default server configurations keyed by LSP language identifier
pub fn defaults() -> BTreeMap<String, ServerConfig> {
    let mut configs = BTreeMap::new();

    configs.insert("rust".to_string(), ServerConfig::new("rust-analyzer", &[]));
    configs.insert(
        "python".to_string(),
        ServerConfig::new("pyright-langserver", &["--stdio"]),
    );
    configs.insert("c".to_string(), ServerConfig::new("clangd", &[]));
    configs.insert("cpp".to_string(), ServerConfig::new("clangd", &[]));
    configs.insert(
        "javascript".to_string(),
        ServerConfig::new("typescript-language-server", &["--stdio"]),
    );
    configs.insert(
        "typescript".to_string(),
        ServerConfig::new("typescript-language-server", &["--stdio"]),
    );
    configs.insert(
        "php".to_string(),
        ServerConfig::new("intelephense", &["--stdio"]),
    );
    configs.insert("go".to_string(), ServerConfig::new("gopls", &[]));

    configs
}

/// Installation status of one configured backend
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInstallStatus {
    pub language_id: String,
    pub command: String,
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_hint: Option<String>,
}

/// Resolve a backend command the same way the spawner will.
pub fn resolve_command(command: &str) -> Option<PathBuf> {
    which::which(command).ok()
}

/// Check every configured backend against `PATH`.
pub fn installation_status(servers: &BTreeMap<String, ServerConfig>) -> Vec<ServerInstallStatus> {
    servers
        .iter()
        .map(|(language_id, config)| {
            let resolved_path = resolve_command(&config.command);
            let installed = resolved_path.is_some();
            ServerInstallStatus {
                language_id: language_id.clone(),
                command: config.command.clone(),
                installed,
                resolved_path,
                install_hint: if installed {
                    None
                } else {
                    install_instructions(&config.command).map(|i| i.current().to_string())
                },
            }
        })
        .collect()
}
