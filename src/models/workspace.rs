//! Workspace root shared by every server of a registry

use std::path::PathBuf;

use url::Url;

use crate::error::LspError;

/// Immutable, validated workspace URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRoot {
    url: Url,
}

impl WorkspaceRoot {
    pub fn parse(uri: &str) -> Result<Self, LspError> {
        Ok(Self {
            url: parse_uri(uri)?,
        })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Local directory for `file:` roots that exist on disk.
    pub fn directory(&self) -> Option<PathBuf> {
        if self.url.scheme() != "file" {
            return None;
        }
        self.url.to_file_path().ok().filter(|path| path.is_dir())
    }

    /// Last path segment, used as the workspace folder name.
    pub fn name(&self) -> String {
        self.url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.url.as_str().to_string())
    }
}

impl std::fmt::Display for WorkspaceRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Parse an absolute URI such as `file:///proj/a.py`.
pub fn parse_uri(uri: &str) -> Result<Url, LspError> {
    Url::parse(uri).map_err(|e| LspError::InvalidUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })
}
