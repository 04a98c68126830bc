//! Error types for the LSP registry

use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

use crate::infra::lsp::protocol::error_codes;

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0}")]
    Lsp(#[from] LspError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Boundary status codes. `0` is success, every failure class is negative.
pub mod status {
    pub const OK: i32 = 0;
    pub const INVALID_ARGUMENT: i32 = -1;
    pub const UNSUPPORTED_LANGUAGE: i32 = -2;
    pub const SPAWN_FAILURE: i32 = -3;
    pub const HANDSHAKE_FAILURE: i32 = -4;
    pub const TIMEOUT: i32 = -5;
    pub const SERVER_CRASHED: i32 = -6;
    pub const NOT_CONNECTED: i32 = -7;
    pub const REGISTRY_CLOSED: i32 = -8;
    pub const SERVER_ERROR: i32 = -9;
    pub const PROTOCOL: i32 = -10;
}

#[derive(Debug, Error)]
pub enum LspError {
    #[error("Failed to start {language} server '{command}': {reason}")]
    SpawnFailure {
        language: String,
        command: String,
        reason: String,
    },

    #[error("No language server configured for '{0}'")]
    UnsupportedLanguage(String),

    #[error("{language} initialize handshake failed: {reason}")]
    Handshake { language: String, reason: String },

    #[error("{language} initialize handshake timed out after {after:?}")]
    HandshakeTimeout { language: String, after: Duration },

    #[error("{language} language server terminated unexpectedly")]
    ServerCrashed { language: String },

    #[error("{language} '{method}' timed out after {after:?}")]
    Timeout {
        language: String,
        method: String,
        after: Duration,
    },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Stream broken: {0}")]
    StreamBroken(#[source] std::io::Error),

    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("{0} language server is not connected")]
    NotConnected(String),

    #[error("Request cancelled")]
    RequestCancelled,

    #[error("Registry has been shut down")]
    RegistryClosed,

    #[error("Server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LspError {
    const SERVER_TERMINATED_CODE: i32 = -32099;

    /// Status code handed across the C boundary.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::InvalidUri { .. } | Self::InvalidParams(_) => status::INVALID_ARGUMENT,
            Self::UnsupportedLanguage(_) => status::UNSUPPORTED_LANGUAGE,
            Self::SpawnFailure { .. } => status::SPAWN_FAILURE,
            Self::Handshake { .. } | Self::HandshakeTimeout { .. } => status::HANDSHAKE_FAILURE,
            Self::Timeout { .. } => status::TIMEOUT,
            Self::ServerCrashed { .. } | Self::StreamBroken(_) => status::SERVER_CRASHED,
            Self::NotConnected(_) | Self::RequestCancelled => status::NOT_CONNECTED,
            Self::RegistryClosed => status::REGISTRY_CLOSED,
            Self::ServerError { .. } => status::SERVER_ERROR,
            Self::MalformedFrame(_) | Self::Json(_) => status::PROTOCOL,
        }
    }

    /// JSON-RPC style code used inside structured error payloads.
    pub fn error_code(&self) -> i32 {
        match self {
            Self::ServerError { code, .. } => *code,
            Self::ServerCrashed { .. } | Self::StreamBroken(_) => Self::SERVER_TERMINATED_CODE,
            Self::Timeout { .. } => -32001,
            Self::NotConnected(_) => -32003,
            Self::RequestCancelled | Self::RegistryClosed => error_codes::REQUEST_CANCELLED,
            Self::InvalidParams(_) | Self::InvalidUri { .. } => error_codes::INVALID_PARAMS,
            Self::MalformedFrame(_) | Self::Json(_) => error_codes::PARSE_ERROR,
            _ => -32000,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SpawnFailure { .. } => "spawnFailure",
            Self::UnsupportedLanguage(_) => "unsupportedLanguage",
            Self::Handshake { .. } => "handshakeError",
            Self::HandshakeTimeout { .. } => "handshakeTimeout",
            Self::ServerCrashed { .. } => "serverCrashed",
            Self::Timeout { .. } => "timeout",
            Self::MalformedFrame(_) => "malformedFrame",
            Self::StreamBroken(_) => "streamBroken",
            Self::InvalidUri { .. } => "invalidUri",
            Self::InvalidParams(_) => "invalidParams",
            Self::NotConnected(_) => "notConnected",
            Self::RequestCancelled => "cancelled",
            Self::RegistryClosed => "registryClosed",
            Self::ServerError { .. } => "serverError",
            Self::Json(_) => "json",
        }
    }

    /// Structured payload returned to the host in place of a result.
    pub fn to_json(&self) -> Value {
        let mut error = json!({
            "kind": self.kind(),
            "code": self.error_code(),
            "message": self.to_string(),
        });
        if let Self::ServerError {
            data: Some(data), ..
        } = self
        {
            error["data"] = data.clone();
        }
        json!({ "error": error })
    }

    pub(crate) fn crashed(language: &str) -> Self {
        Self::ServerCrashed {
            language: language.to_string(),
        }
    }
}

impl From<crate::infra::lsp::protocol::ResponseError> for LspError {
    fn from(err: crate::infra::lsp::protocol::ResponseError) -> Self {
        LspError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
