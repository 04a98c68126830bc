//! Request/response correlation for one server instance
//!
//! Ids are allocated from a per-instance counter and never reused while the
//! instance lives. Completion is decided purely by id, so concurrent callers
//! may finish in any order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{Mutex, oneshot};

use super::protocol::{Request, Response};
use crate::error::LspError;

type Outcome = Result<Value, LspError>;

struct PendingRequest {
    method: String,
    deadline: Instant,
    tx: oneshot::Sender<Outcome>,
}

/// Why the router stopped accepting requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Crashed,
    ShutDown,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<u64, PendingRequest>,
    closed: Option<CloseReason>,
}

pub struct RequestRouter {
    language: String,
    next_id: AtomicU64,
    table: Mutex<PendingTable>,
}

impl RequestRouter {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            next_id: AtomicU64::new(1),
            table: Mutex::new(PendingTable::default()),
        }
    }

    fn close_error(&self, reason: CloseReason) -> LspError {
        match reason {
            CloseReason::Crashed => LspError::crashed(&self.language),
            CloseReason::ShutDown => LspError::NotConnected(self.language.clone()),
        }
    }

    /// Allocate an id and record the pending slot.
    pub async fn register(
        &self,
        method: &str,
        timeout: Duration,
    ) -> Result<(u64, oneshot::Receiver<Outcome>), LspError> {
        let mut table = self.table.lock().await;
        if let Some(reason) = table.closed {
            return Err(self.close_error(reason));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        table.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                deadline: Instant::now() + timeout,
                tx,
            },
        );
        Ok((id, rx))
    }

    /// Send a request through `write` and wait for the matching response.
    ///
    /// On timeout the slot is discarded, so a late response is dropped.
    pub async fn send<F, Fut>(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        write: F,
    ) -> Result<Value, LspError>
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Result<(), LspError>>,
    {
        let (id, rx) = self.register(method, timeout).await?;

        tracing::trace!("{} LSP request {}: {}", self.language, id, method);

        if let Err(e) = write(Request::new(id, method, params)).await {
            self.discard(id).await;
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(LspError::RequestCancelled),
            Err(_) => {
                self.discard(id).await;
                Err(LspError::Timeout {
                    language: self.language.clone(),
                    method: method.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// Complete the pending request matching `response.id`.
    ///
    /// Returns `false` for unknown ids (timed out, or never issued).
    pub async fn resolve(&self, response: Response) -> bool {
        let Some(id) = response.id.as_ref().and_then(|id| id.as_u64()) else {
            tracing::debug!(
                "{} LSP response without usable id dropped: {:?}",
                self.language,
                response.error
            );
            return false;
        };

        let Some(pending) = self.table.lock().await.entries.remove(&id) else {
            tracing::debug!(
                "{} LSP response for unknown request {} (may have timed out)",
                self.language,
                id
            );
            return false;
        };

        if Instant::now() > pending.deadline {
            tracing::trace!(
                "{} LSP '{}' ({}) answered past its deadline",
                self.language,
                pending.method,
                id
            );
        }

        let outcome = response.into_result().map_err(LspError::from);
        pending.tx.send(outcome).is_ok()
    }

    pub async fn discard(&self, id: u64) -> bool {
        self.table.lock().await.entries.remove(&id).is_some()
    }

    /// Release every pending request with a synthetic error and refuse new ones.
    pub async fn fail_all(&self, reason: CloseReason) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut table = self.table.lock().await;
            table.closed.get_or_insert(reason);
            table.entries.drain().map(|(_, pending)| pending).collect()
        };

        let count = drained.len();
        if count > 0 {
            tracing::debug!(
                "Failing {} pending {} requests: {:?}",
                count,
                self.language,
                reason
            );
        }
        for pending in drained {
            let _ = pending.tx.send(Err(self.close_error(reason)));
        }
        count
    }

    #[cfg(test)]
    async fn pending_count(&self) -> usize {
        self.table.lock().await.entries.len()
    }

    #[cfg(test)]
    async fn is_closed(&self) -> bool {
        self.table.lock().await.closed.is_some()
    }
}
