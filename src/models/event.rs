//! Events buffered for the host to pull

use serde::Serialize;
use serde_json::Value;

use crate::infra::lsp::protocol::RequestId;

/// A server-initiated message or lifecycle change, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Registry-wide arrival sequence number
    pub seq: u64,
    pub language_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    Notification {
        method: String,
        params: Value,
    },
    ServerRequest {
        id: RequestId,
        method: String,
        params: Value,
    },
    #[serde(rename_all = "camelCase")]
    Initialized {
        capabilities: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        server_info: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    ServerExited {
        exit_code: Option<i32>,
    },
    ServerError {
        message: String,
    },
}

impl EventKind {
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification {
            method: method.into(),
            params: params.unwrap_or(Value::Null),
        }
    }

    /// LSP method name, or the lifecycle tag for registry-generated events.
    pub fn method(&self) -> &str {
        match self {
            Self::Notification { method, .. } | Self::ServerRequest { method, .. } => method,
            Self::Initialized { .. } => "initialized",
            Self::ServerExited { .. } => "serverExited",
            Self::ServerError { .. } => "serverError",
        }
    }
}

impl Event {
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!("Failed to serialize event {}: {}", self.seq, e);
            String::from("null")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_json_shape() {
        let event = Event {
            seq: 7,
            language_id: "python".to_string(),
            kind: EventKind::notification(
                "textDocument/publishDiagnostics",
                Some(json!({ "uri": "file:///proj/a.py", "diagnostics": [] })),
            ),
        };
        let value: Value = serde_json::from_str(&event.to_json_string()).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["seq"], 7);
        assert_eq!(value["languageId"], "python");
        assert_eq!(value["method"], "textDocument/publishDiagnostics");
        assert_eq!(value["params"]["uri"], "file:///proj/a.py");
    }

    #[test]
    fn test_lifecycle_event_shape() {
        let event = Event {
            seq: 0,
            language_id: "rust".to_string(),
            kind: EventKind::ServerExited { exit_code: Some(3) },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "serverExited");
        assert_eq!(value["exitCode"], 3);
        assert_eq!(event.kind.method(), "serverExited");
    }

    #[test]
    fn test_missing_params_become_null() {
        let kind = EventKind::notification("$/progress", None);
        assert_eq!(
            kind,
            EventKind::Notification {
                method: "$/progress".to_string(),
                params: Value::Null
            }
        );
    }
}
