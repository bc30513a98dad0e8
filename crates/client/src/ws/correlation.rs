//! In-flight correlated requests.
//!
//! Every entry is resolved exactly once. Whoever removes the entry from the
//! map (matching reply, timeout task, or a forced failure) owns its
//! completion slot; everyone else finds nothing and does nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use raptor_shared::{ClientId, Payload, RequestId};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::RequestError;

/// Outcome delivered to a waiting caller.
pub type Reply = Result<Payload, RequestError>;

/// Generates `{clientId}-{counter}-{unixMillis}` request ids.
#[derive(Debug)]
pub struct RequestIdGenerator {
    client_id: ClientId,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> RequestId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        RequestId::new(format!(
            "{}-{}-{}",
            self.client_id,
            n,
            Utc::now().timestamp_millis()
        ))
    }
}

struct PendingRequest {
    reply: oneshot::Sender<Reply>,
    created_at: DateTime<Utc>,
    timer: Option<AbortHandle>,
}

/// Maps outstanding request ids to their awaiting callers.
pub struct CorrelationTable {
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    timeout: Duration,
}

impl CorrelationTable {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        })
    }

    /// Register `id` and arm its timeout.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(self: &Arc<Self>, id: RequestId) -> PendingReply {
        let (reply, rx) = oneshot::channel();
        self.pending.lock().insert(
            id.clone(),
            PendingRequest {
                reply,
                created_at: Utc::now(),
                timer: None,
            },
        );

        let table: Weak<Self> = Arc::downgrade(self);
        let timeout = self.timeout;
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(table) = table.upgrade() {
                if table.resolve(&timer_id, Err(RequestError::Timeout(timeout))) {
                    crate::log_warn!("Request {} timed out after {:?}", timer_id, timeout);
                }
            }
        });

        // The entry may already be gone if a reply raced the spawn.
        match self.pending.lock().get_mut(&id) {
            Some(entry) => entry.timer = Some(timer.abort_handle()),
            None => timer.abort(),
        }

        PendingReply { id, rx }
    }

    /// Complete `id` with `reply`.
    ///
    /// Returns `false` if the id is unknown (already resolved, timed out, or
    /// never registered); the reply is then discarded.
    pub fn resolve(&self, id: &RequestId, reply: Reply) -> bool {
        let Some(entry) = self.pending.lock().remove(id) else {
            return false;
        };
        if let Some(timer) = entry.timer {
            timer.abort();
        }
        crate::log_debug!(
            "Request {} settled after {}ms",
            id,
            (Utc::now() - entry.created_at).num_milliseconds()
        );
        // The caller may have stopped waiting; that is fine.
        let _ = entry.reply.send(reply);
        true
    }

    /// Fail every pending request with `error` and empty the table.
    pub fn fail_all(&self, error: RequestError) -> usize {
        let drained: Vec<(RequestId, PendingRequest)> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            let _ = entry.reply.send(Err(error.clone()));
        }
        if count > 0 {
            crate::log_info!("Failed {} pending request(s): {}", count, error);
        }
        count
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// The caller's half of a registered request.
#[derive(Debug)]
pub struct PendingReply {
    id: RequestId,
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the single resolution of this request.
    pub async fn wait(self) -> Reply {
        self.rx.await.unwrap_or(Err(RequestError::ConnectionClosed))
    }
}
