//! Request correlation.
//!
//! Many requests share one socket. Each gets a fresh id and a oneshot slot;
//! the reader completes the slot whose id matches the response. Responses
//! may arrive in any order.

use crate::error::ClientError;
use crate::transport::Outbound;
use matterlink_core::{Command, CommandMessage, ErrorResult, ServerInfo, SuccessResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::time;

type Completion = Result<Value, ClientError>;
type PendingMap = BTreeMap<u64, PendingRequest>;

struct PendingRequest {
    command: Command,
    issued_at: Instant,
    reply: oneshot::Sender<Completion>,
}

pub(crate) struct Correlator {
    next_id: AtomicU64,
    pending: Arc<Mutex<PendingMap>>,
}

/// Handle for one in-flight request. Dropping it forgets the request, so a
/// response that arrives afterwards is discarded.
pub(crate) struct PendingReply {
    id: u64,
    command: Command,
    rx: oneshot::Receiver<Completion>,
    pending: Weak<Mutex<PendingMap>>,
}

fn lock(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingMap> {
        lock(&self.pending)
    }

    fn check_schema(
        server: &ServerInfo,
        command: Command,
        min_schema: Option<u32>,
    ) -> Result<(), ClientError> {
        match min_schema {
            Some(required) if !server.supports(required) => Err(ClientError::UnsupportedVersion {
                command,
                required,
                actual: server.schema_version,
            }),
            _ => Ok(()),
        }
    }

    fn encode(id: u64, command: Command, args: Value) -> Result<String, ClientError> {
        serde_json::to_string(&CommandMessage::new(id, command, args))
            .map_err(|source| ClientError::Encode { command, source })
    }

    /// Send a command and register for its response.
    ///
    /// The schema gate runs before an id is allocated, so a rejected command
    /// puts nothing on the wire.
    pub fn issue(
        &self,
        out: &impl Outbound,
        server: &ServerInfo,
        command: Command,
        args: Value,
        min_schema: Option<u32>,
    ) -> Result<PendingReply, ClientError> {
        Self::check_schema(server, command, min_schema)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = Self::encode(id, command, args)?;
        let (tx, rx) = oneshot::channel();
        self.lock().insert(
            id,
            PendingRequest {
                command,
                issued_at: Instant::now(),
                reply: tx,
            },
        );

        if let Err(e) = out.send(frame) {
            self.lock().remove(&id);
            return Err(e);
        }
        Ok(PendingReply {
            id,
            command,
            rx,
            pending: Arc::downgrade(&self.pending),
        })
    }

    /// Send a command without waiting for its response.
    ///
    /// Nothing is recorded, so whatever the server answers is discarded.
    pub fn issue_detached(
        &self,
        out: &impl Outbound,
        server: &ServerInfo,
        command: Command,
        args: Value,
        min_schema: Option<u32>,
    ) -> Result<u64, ClientError> {
        Self::check_schema(server, command, min_schema)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        out.send(Self::encode(id, command, args)?)?;
        Ok(id)
    }

    fn complete(&self, id: u64, outcome: Completion) -> bool {
        let Some(pending) = self.lock().remove(&id) else {
            tracing::debug!("Discarding response for unknown message_id {}", id);
            return false;
        };
        tracing::debug!(
            "{} (message_id {}) completed after {:?}",
            pending.command,
            id,
            pending.issued_at.elapsed()
        );
        // The caller may have stopped waiting; that is not our problem.
        let _ = pending.reply.send(outcome);
        true
    }

    pub fn on_success(&self, msg: SuccessResult) -> bool {
        self.complete(msg.message_id, Ok(msg.result))
    }

    pub fn on_error(&self, msg: ErrorResult) -> bool {
        self.complete(
            msg.message_id,
            Err(ClientError::Remote {
                code: msg.error_code,
                details: msg.details,
            }),
        )
    }

    /// Reject every outstanding request with `ConnectionLost`.
    pub fn fail_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.lock());
        let count = drained.len();
        for (_, pending) in drained {
            let _ = pending.reply.send(Err(ClientError::ConnectionLost));
        }
        if count > 0 {
            tracing::debug!("Rejected {} outstanding requests", count);
        }
        count
    }

    pub fn outstanding(&self) -> usize {
        self.lock().len()
    }
}

impl PendingReply {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the response, optionally bounded by `timeout`.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<Value, ClientError> {
        let outcome = match timeout {
            None => (&mut self.rx).await,
            Some(after) => match time::timeout(after, &mut self.rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(ClientError::Timeout {
                        command: self.command,
                        after,
                    });
                }
            },
        };
        // A dropped sender means the slot was torn down without an answer.
        outcome.unwrap_or(Err(ClientError::ConnectionLost))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.upgrade() {
            lock(&pending).remove(&self.id);
        }
    }
}
