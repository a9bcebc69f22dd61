//! Request ledger: in-flight asynchronous client requests.
//!
//! Each delegated request runs as an [`Abortable`] tokio task. A small
//! supervisor task awaits the worker's `JoinHandle` and turns the outcome
//! (result or panic) into a [`WorkerEvent`] on the session's inbound queue.
//! Aborted workers report nothing.
//!
//! Every delegation gets a fresh token. A completion is only accepted when
//! its token matches the pending entry, so a late completion for a cancelled
//! request cannot be mistaken for a newer request that reuses the same id.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::future::{AbortHandle, Abortable};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::protocol::{RequestError, RequestId};

/// Work handed to a request worker.
pub type WorkFut = Pin<Box<dyn Future<Output = Result<Value, RequestError>> + Send>>;

#[derive(Debug)]
pub(crate) enum WorkerOutcome {
    Finished(Result<Value, RequestError>),
    /// The worker panicked.
    Crashed(String),
}

#[derive(Debug)]
pub(crate) struct WorkerEvent {
    pub id: RequestId,
    pub token: u64,
    pub outcome: WorkerOutcome,
}

#[derive(Debug, thiserror::Error)]
#[error("request id {0} is already in flight")]
pub(crate) struct DuplicateRequest(pub RequestId);

#[derive(Debug)]
struct PendingRequest {
    command: String,
    started: Instant,
    token: u64,
    abort: AbortHandle,
}

/// A request leaving the ledger, ready to be answered.
#[derive(Debug)]
pub(crate) struct SettledRequest {
    pub id: RequestId,
    pub command: String,
    pub elapsed: Duration,
    pub result: Result<Value, RequestError>,
}

#[derive(Debug)]
pub(crate) struct RequestLedger<E> {
    pending: HashMap<RequestId, PendingRequest>,
    next_token: u64,
    events: mpsc::Sender<E>,
}

impl<E> RequestLedger<E>
where
    E: From<WorkerEvent> + Send + 'static,
{
    pub fn new(events: mpsc::Sender<E>) -> Self {
        Self {
            pending: HashMap::new(),
            next_token: 0,
            events,
        }
    }

    /// Register `id` and spawn `work` on its own task. Returns immediately.
    pub fn delegate(
        &mut self,
        id: RequestId,
        command: &str,
        started: Instant,
        work: WorkFut,
    ) -> Result<(), DuplicateRequest> {
        if self.pending.contains_key(&id) {
            return Err(DuplicateRequest(id));
        }
        self.next_token += 1;
        let token = self.next_token;

        let (abort, registration) = AbortHandle::new_pair();
        let worker = tokio::spawn(Abortable::new(work, registration));

        let events = self.events.clone();
        let worker_id = id.clone();
        tokio::spawn(async move {
            let outcome = match worker.await {
                Ok(Ok(result)) => WorkerOutcome::Finished(result),
                Ok(Err(_aborted)) => return,
                Err(join_err) if join_err.is_panic() => {
                    WorkerOutcome::Crashed(panic_payload_to_string(&join_err.into_panic()))
                }
                Err(join_err) => WorkerOutcome::Crashed(join_err.to_string()),
            };
            let event = WorkerEvent {
                id: worker_id,
                token,
                outcome,
            };
            // The session may already be gone.
            let _ = events.send(E::from(event)).await;
        });

        tracing::debug!(%id, command, "request delegated");
        self.pending.insert(
            id,
            PendingRequest {
                command: command.to_string(),
                started,
                token,
                abort,
            },
        );
        Ok(())
    }

    /// Settle the request a worker reported on. `None` when the request is no
    /// longer pending (cancelled, or superseded by a reused id).
    pub fn complete(&mut self, event: WorkerEvent) -> Option<SettledRequest> {
        match self.pending.get(&event.id) {
            Some(entry) if entry.token == event.token => {}
            _ => {
                tracing::debug!(id = %event.id, "discarding completion for settled request");
                return None;
            }
        }
        let entry = self.pending.remove(&event.id)?;
        let result = match event.outcome {
            WorkerOutcome::Finished(result) => result,
            WorkerOutcome::Crashed(reason) => {
                tracing::error!(id = %event.id, command = %entry.command, "worker crashed: {reason}");
                Err(RequestError::internal(format!("request handler crashed: {reason}")))
            }
        };
        Some(settle(event.id, entry, result))
    }

    /// Abort the worker for `id` and settle it as cancelled. `None` when `id`
    /// is unknown or already finished.
    pub fn cancel(&mut self, id: &RequestId) -> Option<SettledRequest> {
        let Some(entry) = self.pending.remove(id) else {
            tracing::debug!(%id, "cancel for unknown or finished request");
            return None;
        };
        entry.abort.abort();
        Some(settle(id.clone(), entry, Err(RequestError::cancelled())))
    }

    /// Abort every worker and settle each request with `error`.
    pub fn abandon_all(&mut self, error: &RequestError) -> Vec<SettledRequest> {
        let mut settled: Vec<SettledRequest> = self
            .pending
            .drain()
            .map(|(id, entry)| {
                entry.abort.abort();
                settle(id, entry, Err(error.clone()))
            })
            .collect();
        settled.sort_by_key(|s| s.id.to_string());
        settled
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<E> Drop for RequestLedger<E> {
    fn drop(&mut self) {
        for entry in self.pending.values() {
            entry.abort.abort();
        }
    }
}

fn settle(id: RequestId, entry: PendingRequest, result: Result<Value, RequestError>) -> SettledRequest {
    SettledRequest {
        id,
        command: entry.command,
        elapsed: entry.started.elapsed(),
        result,
    }
}

pub(crate) fn panic_payload_to_string(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
