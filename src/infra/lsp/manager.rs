//! LSP Server Manager
//!
//! Maps language identifiers to server instances with race-safe access.
//! Concurrent `ensure` calls for one language share a single startup.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{Notify, RwLock};

use super::client::LspClient;
use super::events::EventQueue;
use crate::config::RuntimeConfig;
use crate::error::LspError;
use crate::models::config::ServerConfig;
use crate::models::event::EventKind;
use crate::models::state::ServerState;
use crate::models::workspace::WorkspaceRoot;

/// One in-flight startup. `finished` outlives the wakeup so late waiters
/// never block on a notification that already fired.
struct Startup {
    generation: u64,
    notify: Notify,
    finished: AtomicBool,
}

impl Startup {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            notify: Notify::new(),
            finished: AtomicBool::new(false),
        }
    }

    async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if !self.finished.load(Ordering::Acquire) {
            notified.await;
        }
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

enum ClientState {
    Initializing(Arc<Startup>),
    Ready(Arc<LspClient>),
}

impl ClientState {
    fn client(&self) -> Option<Arc<LspClient>> {
        match self {
            Self::Ready(client) => Some(Arc::clone(client)),
            Self::Initializing(_) => None,
        }
    }
}

/// Point-in-time view of one language slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSnapshot {
    pub language_id: String,
    pub state: ServerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

pub struct LspManager {
    root: WorkspaceRoot,
    settings: RuntimeConfig,
    configs: BTreeMap<String, ServerConfig>,
    events: Arc<EventQueue>,
    clients: RwLock<HashMap<String, ClientState>>,
    /// Bumped by every `shutdown_all`; startups from an older generation
    /// are shut down instead of published.
    generation: AtomicU64,
    closed: AtomicBool,
}

impl LspManager {
    pub fn new(
        root: WorkspaceRoot,
        settings: RuntimeConfig,
        configs: BTreeMap<String, ServerConfig>,
        events: Arc<EventQueue>,
    ) -> Self {
        Self {
            root,
            settings,
            configs,
            events,
            clients: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Get a ready client, starting (or restarting) one if needed.
    ///
    /// A call that overlaps `shutdown_all` fails with `RequestCancelled`
    /// rather than bringing a server back up behind it.
    pub async fn ensure(&self, language: &str) -> Result<Arc<LspClient>, LspError> {
        let generation = self.generation.load(Ordering::Acquire);
        loop {
            if self.is_closed() {
                return Err(LspError::RegistryClosed);
            }
            if self.generation.load(Ordering::Acquire) != generation {
                return Err(LspError::RequestCancelled);
            }

            // Phase 1: Get client or notify under lock, release immediately
            let (client_opt, startup_opt) = {
                let clients = self.clients.read().await;
                match clients.get(language) {
                    Some(ClientState::Ready(client)) => (Some(Arc::clone(client)), None),
                    Some(ClientState::Initializing(startup)) => (None, Some(Arc::clone(startup))),
                    None => (None, None),
                }
            };

            // Phase 2: Check state outside lock
            if let Some(client) = client_opt {
                let state = client.state();
                if state == ServerState::Ready {
                    return Ok(client);
                }
                if state.is_alive() || state == ServerState::ShuttingDown {
                    return Err(LspError::NotConnected(language.to_string()));
                }

                // Crashed or stopped: replace the instance
                let mut clients = self.clients.write().await;
                if let Some(ClientState::Ready(current)) = clients.get(language)
                    && Arc::ptr_eq(current, &client)
                {
                    clients.remove(language);
                    tracing::info!("{} language server restarting (was {})", language, state);
                }
                continue;
            }

            // Phase 3: Wait for initialization or start new
            if let Some(startup) = startup_opt {
                startup.wait().await;
                continue;
            }

            // Phase 4: Start new client
            let startup = {
                let mut clients = self.clients.write().await;
                if clients.contains_key(language)
                    || self.generation.load(Ordering::Acquire) != generation
                {
                    continue; // Race: another caller started or a shutdown ran, retry
                }
                let startup = Arc::new(Startup::new(generation));
                clients.insert(
                    language.to_string(),
                    ClientState::Initializing(Arc::clone(&startup)),
                );
                startup
            };

            return self.start_client_internal(language, startup).await;
        }
    }

    async fn start_client_internal(
        &self,
        language: &str,
        startup: Arc<Startup>,
    ) -> Result<Arc<LspClient>, LspError> {
        let result = self.do_start_client(language).await;

        let outcome = {
            let mut clients = self.clients.write().await;
            let stale = self.generation.load(Ordering::Acquire) != startup.generation;
            // after shutdown_all the slot may already belong to a newer startup
            let owns_slot = matches!(
                clients.get(language),
                Some(ClientState::Initializing(current)) if Arc::ptr_eq(current, &startup)
            );

            match result {
                Ok(client) if stale || self.is_closed() => {
                    if owns_slot {
                        clients.remove(language);
                    }
                    Err(client)
                }
                Ok(client) => {
                    clients.insert(language.to_string(), ClientState::Ready(Arc::clone(&client)));
                    Ok(Ok(client))
                }
                Err(e) => {
                    if owns_slot {
                        clients.remove(language);
                    }
                    Ok(Err(e))
                }
            }
        };

        let result = match outcome {
            Ok(Ok(client)) => Ok(client),
            Ok(Err(e)) => {
                self.events.push(
                    language,
                    EventKind::ServerError {
                        message: e.to_string(),
                    },
                );
                Err(e)
            }
            // shutdown_all or close ran while the handshake was in flight
            Err(client) => {
                tracing::info!("{} language server started after shutdown; stopping it", language);
                client.shutdown().await;
                Err(if self.is_closed() {
                    LspError::RegistryClosed
                } else {
                    LspError::RequestCancelled
                })
            }
        };
        startup.finish();
        result
    }

    async fn do_start_client(&self, language: &str) -> Result<Arc<LspClient>, LspError> {
        let config = self
            .configs
            .get(language)
            .ok_or_else(|| LspError::UnsupportedLanguage(language.to_string()))?;

        LspClient::start(
            language,
            config,
            &self.root,
            &self.settings,
            Arc::clone(&self.events),
        )
        .await
    }

    /// Shut every instance down concurrently; each gets its own grace period.
    ///
    /// Startups still in flight are waited for; they observe the new
    /// generation and stop their own instance before finishing.
    pub async fn shutdown_all(&self) {
        let (clients_to_shutdown, startups) = {
            let mut clients = self.clients.write().await;
            self.generation.fetch_add(1, Ordering::AcqRel);

            let mut ready = Vec::new();
            let mut starting = Vec::new();
            for (_, state) in clients.drain() {
                match state {
                    ClientState::Ready(client) => ready.push(client),
                    ClientState::Initializing(startup) => starting.push(startup),
                }
            }
            (ready, starting)
        };

        if clients_to_shutdown.is_empty() && startups.is_empty() {
            return;
        }
        tracing::info!(
            "Shutting down {} language server(s), {} still starting",
            clients_to_shutdown.len(),
            startups.len()
        );

        futures::future::join(
            futures::future::join_all(clients_to_shutdown.iter().map(|client| client.shutdown())),
            futures::future::join_all(startups.iter().map(|startup| startup.wait())),
        )
        .await;
    }

    /// Refuse new work, then shut everything down.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown_all().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn server_state(&self, language: &str) -> ServerState {
        let clients = self.clients.read().await;
        match clients.get(language) {
            Some(ClientState::Ready(client)) => client.state(),
            Some(ClientState::Initializing(_)) => ServerState::Starting,
            None => ServerState::NotStarted,
        }
    }

    pub async fn server_pid(&self, language: &str) -> Option<u32> {
        let clients = self.clients.read().await;
        clients
            .get(language)
            .and_then(|s| s.client())
            .filter(|c| !c.has_exited())
            .and_then(|c| c.pid())
    }

    /// Languages with an instance (in any state), sorted.
    pub async fn languages(&self) -> Vec<String> {
        let clients = self.clients.read().await;
        let mut languages: Vec<String> = clients.keys().cloned().collect();
        languages.sort();
        languages
    }

    pub async fn snapshot(&self) -> Vec<ServerSnapshot> {
        let mut snapshots = Vec::new();
        for language in self.languages().await {
            snapshots.push(ServerSnapshot {
                state: self.server_state(&language).await,
                pid: self.server_pid(&language).await,
                language_id: language,
            });
        }
        snapshots
    }
}
