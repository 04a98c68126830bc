//! A single language server instance
//!
//! Owns one backend process. Four tasks run per instance:
//! - writer: the only task touching stdin, so frames never interleave
//! - reader: deframes stdout, resolves responses and queues everything else
//! - monitor: owns the `Child` and waits on it to detect exit
//! - stderr forwarder: relays backend stderr to tracing

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};

use super::events::EventQueue;
use super::protocol::{
    ClientInfo, InitializeParams, InitializeResult, Message, Notification, Request, Response,
    ResponseError, WorkspaceFolder, client_capabilities,
};
use super::router::{CloseReason, RequestRouter};
use super::transport::{Transport, frame_message, write_frame};
use crate::config::RuntimeConfig;
use crate::error::LspError;
use crate::models::config::{ServerConfig, ServerRequestPolicy};
use crate::models::event::EventKind;
use crate::models::state::ServerState;
use crate::models::workspace::WorkspaceRoot;

/// How long to wait for the process to be reaped after a forced kill.
const KILL_WAIT: Duration = Duration::from_secs(2);

enum WriterCommand {
    Frame(Vec<u8>),
    Close,
}

/// `None` while the process runs, `Some(exit_code)` once it has been reaped.
type ExitSignal = Option<Option<i32>>;

pub struct LspClient {
    language: String,
    root: WorkspaceRoot,
    settings: RuntimeConfig,
    state: AtomicU8,
    pid: Option<u32>,
    router: RequestRouter,
    events: Arc<EventQueue>,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    kill_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    exit_rx: watch::Receiver<ExitSignal>,
}

impl LspClient {
    /// Spawn the backend, wire up its pipes and run the initialize handshake.
    ///
    /// On success the instance is `Ready`. On handshake failure the process is
    /// terminated before the error is returned.
    pub async fn start(
        language: &str,
        config: &ServerConfig,
        root: &WorkspaceRoot,
        settings: &RuntimeConfig,
        events: Arc<EventQueue>,
    ) -> Result<Arc<Self>, LspError> {
        tracing::info!(
            "Starting {} language server: {} {:?}",
            language,
            config.command,
            config.args
        );

        let spawn_error = |reason: String| LspError::SpawnFailure {
            language: language.to_string(),
            command: config.command.clone(),
            reason,
        };

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = root.directory() {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| spawn_error(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("Failed to get stdout".to_string()))?;
        let stderr = child.stderr.take();

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let client = Arc::new(Self {
            language: language.to_string(),
            root: root.clone(),
            settings: settings.clone(),
            state: AtomicU8::new(ServerState::Starting.to_u8()),
            pid: child.id(),
            router: RequestRouter::new(language),
            events,
            writer_tx,
            kill_tx: std::sync::Mutex::new(Some(kill_tx)),
            exit_rx,
        });

        tokio::spawn(Arc::clone(&client).write_frames(stdin, writer_rx));
        tokio::spawn(Arc::clone(&client).read_messages(Transport::new(stdout)));
        tokio::spawn(Arc::clone(&client).watch_process(child, kill_rx, exit_tx));
        if let Some(stderr) = stderr {
            tokio::spawn(forward_stderr(language.to_string(), stderr));
        }

        client.transition(ServerState::Initializing);

        if let Err(e) = client
            .initialize(config.initialization_options.clone())
            .await
        {
            tracing::warn!("{} language server failed to initialize: {}", language, e);
            client.abort().await;
            return Err(e);
        }

        tracing::info!(
            "{} language server started successfully (pid {:?})",
            language,
            client.pid
        );
        Ok(client)
    }

    /// Perform the LSP initialize handshake
    async fn initialize(&self, initialization_options: Option<Value>) -> Result<(), LspError> {
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(self.root.as_str().to_string()),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: self.root.as_str().to_string(),
                name: self.root.name(),
            }]),
            capabilities: client_capabilities(),
            client_info: Some(ClientInfo {
                name: "lsp-registry".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            initialization_options,
        };

        let result = self
            .call("initialize", Some(serde_json::to_value(params)?))
            .await
            .map_err(|e| self.handshake_error(e))?;

        let result: InitializeResult =
            serde_json::from_value(result).map_err(|e| LspError::Handshake {
                language: self.language.clone(),
                reason: format!("invalid initialize result: {}", e),
            })?;

        self.send_frame(&Notification::new("initialized", Some(json!({}))))?;

        if !self.transition(ServerState::Ready) {
            return Err(self.unavailable_error(self.state()));
        }
        self.events
            .push(
                &self.language,
                EventKind::Initialized {
                    capabilities: result.capabilities,
                    server_info: result.server_info,
                },
            );
        Ok(())
    }

    fn handshake_error(&self, err: LspError) -> LspError {
        match err {
            LspError::Timeout { after, .. } => LspError::HandshakeTimeout {
                language: self.language.clone(),
                after,
            },
            other => LspError::Handshake {
                language: self.language.clone(),
                reason: other.to_string(),
            },
        }
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` if the lifecycle allows it from the current state.
    fn transition(&self, next: ServerState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = ServerState::from_u8(current);
            if !from.can_transition_to(next) {
                return false;
            }
            match self.state.compare_exchange(
                current,
                next.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tracing::debug!("{} language server: {} -> {}", self.language, from, next);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn unavailable_error(&self, state: ServerState) -> LspError {
        match state {
            ServerState::Crashed => LspError::crashed(&self.language),
            _ => LspError::NotConnected(self.language.clone()),
        }
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Queue a frame for the writer task. Returns once it is handed over.
    fn send_frame<T: Serialize>(&self, message: &T) -> Result<(), LspError> {
        let frame = frame_message(message)?;
        self.writer_tx
            .send(WriterCommand::Frame(frame))
            .map_err(|_| LspError::NotConnected(self.language.clone()))
    }

    /// Send a request and wait for response. Requires a `Ready` instance.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, LspError> {
        let state = self.state();
        if state != ServerState::Ready {
            return Err(self.unavailable_error(state));
        }
        self.call(method, params).await
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, LspError> {
        let timeout = self.settings.timeouts.timeout_for(method);
        let sent_id = AtomicU64::new(0);
        let sent = &sent_id;

        let result = self
            .router
            .send(method, params, timeout, |request: Request| async move {
                if let Some(id) = request.id.as_u64() {
                    sent.store(id, Ordering::Relaxed);
                }
                self.send_frame(&request)
            })
            .await;

        if matches!(result, Err(LspError::Timeout { .. })) {
            let id = sent_id.load(Ordering::Relaxed);
            tracing::debug!("{} LSP '{}' ({}) timed out", self.language, method, id);
            let _ = self.send_frame(&Notification::new(
                "$/cancelRequest",
                Some(json!({ "id": id })),
            ));
        }
        result
    }

    /// Send a notification (no response expected). Never blocks.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<(), LspError> {
        let state = self.state();
        if state != ServerState::Ready {
            return Err(self.unavailable_error(state));
        }
        self.send_frame(&Notification::new(method, params))
    }

    // ------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------

    async fn write_frames(
        self: Arc<Self>,
        mut stdin: ChildStdin,
        mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    ) {
        while let Some(command) = rx.recv().await {
            match command {
                WriterCommand::Frame(frame) => {
                    if let Err(e) = write_frame(&mut stdin, &frame).await {
                        if self.state().is_alive() {
                            tracing::error!("{} LSP write error: {}", self.language, e);
                            self.handle_stream_failure().await;
                        }
                        break;
                    }
                }
                WriterCommand::Close => break,
            }
        }
        tracing::trace!("{} LSP writer finished", self.language);
    }

    async fn read_messages(self: Arc<Self>, mut transport: Transport<ChildStdout>) {
        loop {
            match transport.read_message().await {
                Ok(Some(message)) => self.dispatch(message).await,
                Ok(None) => {
                    tracing::debug!("{} language server closed stdout", self.language);
                    break;
                }
                Err(LspError::MalformedFrame(reason)) => {
                    tracing::warn!(
                        "{} LSP dropped malformed frame: {}",
                        self.language,
                        reason
                    );
                }
                Err(e) => {
                    if self.state().is_alive() {
                        tracing::error!("{} LSP read error: {}", self.language, e);
                    }
                    break;
                }
            }
        }

        if self.state().is_alive() {
            self.handle_stream_failure().await;
        }
    }

    async fn watch_process(
        self: Arc<Self>,
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        exit_tx: watch::Sender<ExitSignal>,
    ) {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_rx => {
                if let Err(e) = child.start_kill() {
                    tracing::debug!("{} kill failed: {}", self.language, e);
                }
                child.wait().await
            }
        };

        let exit_code = match status {
            Ok(status) => {
                tracing::debug!("{} language server exited: {}", self.language, status);
                status.code()
            }
            Err(e) => {
                tracing::warn!("{} language server wait error: {}", self.language, e);
                None
            }
        };

        self.on_exit(exit_code).await;
        let _ = exit_tx.send(Some(exit_code));
    }

    async fn on_exit(&self, exit_code: Option<i32>) {
        let reason = if self.state() == ServerState::ShuttingDown {
            self.transition(ServerState::Stopped);
            CloseReason::ShutDown
        } else {
            if self.transition(ServerState::Crashed) {
                tracing::warn!(
                    "{} language server exited unexpectedly (code {:?})",
                    self.language,
                    exit_code
                );
            }
            self.events
                .push(&self.language, EventKind::ServerExited { exit_code });
            CloseReason::Crashed
        };

        self.router.fail_all(reason).await;
        let _ = self.writer_tx.send(WriterCommand::Close);
    }

    /// A pipe failed while the process was supposed to be alive.
    async fn handle_stream_failure(&self) {
        if self.transition(ServerState::Crashed) {
            tracing::warn!("{} language server stream broken", self.language);
        }
        self.router.fail_all(CloseReason::Crashed).await;
        self.kill();
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    async fn dispatch(&self, message: Message) {
        match message {
            Message::Response(response) => {
                self.router.resolve(response).await;
            }
            Message::Notification(notification) => {
                tracing::trace!(
                    "{} LSP notification: {}",
                    self.language,
                    notification.method
                );
                self.events.push(
                    &self.language,
                    EventKind::notification(notification.method, notification.params),
                );
            }
            Message::Request(request) => self.handle_server_request(request),
        }
    }

    fn handle_server_request(&self, request: Request) {
        tracing::debug!(
            "{} LSP server request {}: {}",
            self.language,
            request.id,
            request.method
        );

        self.events.push(
            &self.language,
            EventKind::ServerRequest {
                id: request.id.clone(),
                method: request.method.clone(),
                params: request.params.clone().unwrap_or(Value::Null),
            },
        );

        let response = match self.settings.server_requests {
            ServerRequestPolicy::Ignore => return,
            ServerRequestPolicy::MethodNotFound => Response::failure(
                request.id,
                ResponseError::method_not_found(&request.method),
            ),
            ServerRequestPolicy::DefaultReply => {
                let result = self.default_reply(&request.method, request.params.as_ref());
                Response::success(request.id, result)
            }
        };

        if let Err(e) = self.send_frame(&response) {
            tracing::debug!("{} failed to answer server request: {}", self.language, e);
        }
    }

    fn default_reply(&self, method: &str, params: Option<&Value>) -> Value {
        match method {
            "workspace/configuration" => {
                let items = params
                    .and_then(|p| p.get("items"))
                    .and_then(|i| i.as_array())
                    .map(|arr| arr.len())
                    .unwrap_or(0);
                Value::Array(vec![Value::Object(serde_json::Map::new()); items])
            }
            "workspace/workspaceFolders" => json!([{
                "uri": self.root.as_str(),
                "name": self.root.name(),
            }]),
            _ => Value::Null,
        }
    }

    // ------------------------------------------------------------------
    // Termination
    // ------------------------------------------------------------------

    fn kill(&self) {
        let sender = self
            .kill_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
    }

    async fn wait_for_exit(&self, limit: Duration) -> bool {
        let mut exit_rx = self.exit_rx.clone();
        match tokio::time::timeout(limit, exit_rx.wait_for(|exit| exit.is_some())).await {
            Ok(result) => result.is_ok(),
            Err(_) => false,
        }
    }

    /// Graceful shutdown: `shutdown` request, `exit` notification, stdin EOF,
    /// then a forced kill once the grace period runs out. A crashed instance
    /// is only reaped and keeps its `Crashed` state.
    pub async fn shutdown(&self) {
        let began = Instant::now();
        let grace = self.settings.timeouts.shutdown_grace;

        if self.transition(ServerState::ShuttingDown) {
            match self.call("shutdown", None).await {
                Ok(_) => {
                    let _ = self.send_frame(&Notification::new("exit", None));
                }
                Err(e) => {
                    tracing::debug!("{} LSP shutdown request failed: {}", self.language, e);
                }
            }
            let _ = self.writer_tx.send(WriterCommand::Close);
        }

        if !self.wait_for_exit(grace.saturating_sub(began.elapsed())).await {
            tracing::warn!(
                "{} language server did not exit within {:?}, forcing kill",
                self.language,
                grace
            );
            self.kill();
            self.wait_for_exit(KILL_WAIT).await;
        }

        self.router.fail_all(CloseReason::ShutDown).await;
        tracing::info!("{} language server stopped", self.language);
    }

    /// Tear down an instance that never became ready.
    async fn abort(&self) {
        self.transition(ServerState::ShuttingDown);
        self.kill();
        if !self.wait_for_exit(KILL_WAIT).await {
            tracing::warn!("{} language server could not be reaped", self.language);
        }
        self.router.fail_all(CloseReason::ShutDown).await;
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// OS process id of the backend, while it is known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }
}

async fn forward_stderr(language: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!("{} stderr: {}", language, line);
    }
}
