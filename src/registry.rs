//! Blocking registry facade
//!
//! A [`Registry`] owns its own tokio runtime. Every public method blocks the
//! calling thread, so hosts without an async runtime (including foreign
//! callers behind the C ABI) can drive it directly. Methods may be called
//! from several threads at once but never from inside an async context.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Runtime;

use crate::config::RuntimeConfig;
use crate::error::{LspError, RegistryResult};
use crate::infra::lsp::{EventQueue, LspManager, ServerSnapshot};
use crate::models::config::RegistryConfig;
use crate::models::event::Event;
use crate::models::state::ServerState;
use crate::models::workspace::{WorkspaceRoot, parse_uri};
use crate::services::config::load_or_default;

pub struct Registry {
    runtime: Option<Runtime>,
    manager: LspManager,
    events: Arc<EventQueue>,
}

impl Registry {
    /// Create a registry for `root_uri` using the user configuration.
    pub fn new(root_uri: &str) -> RegistryResult<Self> {
        Self::with_config(root_uri, &load_or_default())
    }

    pub fn with_config(root_uri: &str, config: &RegistryConfig) -> RegistryResult<Self> {
        config.validate()?;
        let root = WorkspaceRoot::parse(root_uri)?;
        let settings = RuntimeConfig::from(config);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("lsp-registry")
            .enable_all()
            .build()?;

        let events = Arc::new(EventQueue::new(settings.event_capacity));
        let manager = LspManager::new(
            root,
            settings,
            config.server_table(),
            Arc::clone(&events),
        );

        tracing::debug!("Registry created for {}", root_uri);
        Ok(Self {
            runtime: Some(runtime),
            manager,
            events,
        })
    }

    fn block_on<F: Future>(&self, future: F) -> Result<F::Output, LspError> {
        match &self.runtime {
            Some(runtime) => Ok(runtime.block_on(future)),
            None => Err(LspError::RegistryClosed),
        }
    }

    fn check_open(&self) -> Result<(), LspError> {
        if self.manager.is_closed() {
            return Err(LspError::RegistryClosed);
        }
        Ok(())
    }

    /// Start the server for `language_id` unless a ready one already exists.
    ///
    /// `file_uri` names the document that triggered the call; it is
    /// validated but does not influence which server is used.
    pub fn ensure_servers(&self, language_id: &str, file_uri: &str) -> Result<(), LspError> {
        self.check_open()?;
        validate_target(language_id, file_uri)?;
        self.block_on(self.manager.ensure(language_id))??;
        Ok(())
    }

    /// Send a request and block until its response or timeout.
    ///
    /// Starts the server first when none is ready.
    pub fn request(
        &self,
        language_id: &str,
        file_uri: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, LspError> {
        self.check_open()?;
        validate_target(language_id, file_uri)?;
        validate_method(method)?;
        self.block_on(async {
            let client = self.manager.ensure(language_id).await?;
            client.request(method, params).await
        })?
    }

    /// [`Registry::request`] with JSON text in and out.
    ///
    /// Returns the raw result on success, or `{"error":{...}}` on failure.
    pub fn request_json(
        &self,
        language_id: &str,
        file_uri: &str,
        method: &str,
        params_json: Option<&str>,
    ) -> String {
        let result = parse_params(params_json)
            .and_then(|params| self.request(language_id, file_uri, method, params));
        match result {
            Ok(value) => value.to_string(),
            Err(e) => {
                tracing::debug!("{} '{}' failed: {}", language_id, method, e);
                e.to_json().to_string()
            }
        }
    }

    /// Queue a notification for the server. Returns once the frame is handed
    /// to the writer, not when it is delivered.
    pub fn notify(
        &self,
        language_id: &str,
        file_uri: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), LspError> {
        self.check_open()?;
        validate_target(language_id, file_uri)?;
        validate_method(method)?;
        let client = self.block_on(self.manager.ensure(language_id))??;
        client.notify(method, params)
    }

    pub fn notify_json(
        &self,
        language_id: &str,
        file_uri: &str,
        method: &str,
        params_json: Option<&str>,
    ) -> Result<(), LspError> {
        let params = parse_params(params_json)?;
        self.notify(language_id, file_uri, method, params)
    }

    /// Oldest buffered event across all servers. Never blocks.
    pub fn poll_event(&self) -> Option<Event> {
        self.events.pop()
    }

    pub fn poll_event_json(&self) -> Option<String> {
        self.poll_event().map(|event| event.to_json_string())
    }

    /// Gracefully stop every server. The registry stays usable.
    pub fn shutdown_all(&self) -> Result<(), LspError> {
        self.check_open()?;
        self.block_on(self.manager.shutdown_all())
    }

    /// Stop every server and refuse further work. Idempotent.
    pub fn close(&self) {
        if self.manager.is_closed() {
            return;
        }
        if let Err(e) = self.block_on(self.manager.close()) {
            tracing::debug!("Registry close skipped: {}", e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.manager.is_closed()
    }

    pub fn server_state(&self, language_id: &str) -> ServerState {
        self.block_on(self.manager.server_state(language_id))
            .unwrap_or(ServerState::Stopped)
    }

    /// Backend pid while its process is running.
    pub fn server_pid(&self, language_id: &str) -> Option<u32> {
        self.block_on(self.manager.server_pid(language_id))
            .ok()
            .flatten()
    }

    pub fn languages(&self) -> Vec<String> {
        self.block_on(self.manager.languages()).unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<ServerSnapshot> {
        self.block_on(self.manager.snapshot()).unwrap_or_default()
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Events discarded because the queue was full.
    pub fn events_dropped(&self) -> u64 {
        self.events.dropped()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_err() {
            runtime.block_on(self.manager.close());
        } else {
            tracing::warn!("Registry dropped inside an async context; killing servers");
        }
        // remaining tasks are dropped, which kills any child still alive
        runtime.shutdown_background();
    }
}

fn validate_target(language_id: &str, file_uri: &str) -> Result<(), LspError> {
    if language_id.trim().is_empty() {
        return Err(LspError::InvalidParams(
            "language id must not be empty".to_string(),
        ));
    }
    if !file_uri.is_empty() {
        let uri = parse_uri(file_uri)?;
        tracing::trace!("{} target {}", language_id, uri);
    }
    Ok(())
}

fn validate_method(method: &str) -> Result<(), LspError> {
    if method.is_empty() {
        return Err(LspError::InvalidParams("method must not be empty".to_string()));
    }
    Ok(())
}

/// Absent, empty and `null` params all mean "no params".
pub fn parse_params(params_json: Option<&str>) -> Result<Option<Value>, LspError> {
    let Some(text) = params_json.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Null) => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(e) => Err(LspError::InvalidParams(format!("params are not valid JSON: {}", e))),
    }
}
