//! Tracks running requests so `$/cancelRequest` can reach them.
use crate::lsp::RequestId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Entry {
    serial: u64,
    token: CancellationToken,
}

pub struct CancellationRegistry {
    parent: CancellationToken,
    next_serial: AtomicU64,
    entries: Mutex<HashMap<RequestId, Entry>>,
}

impl CancellationRegistry {
    pub fn new(parent: CancellationToken) -> Self {
        CancellationRegistry {
            parent,
            next_serial: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RequestId, Entry>> {
        // the map stays consistent even if a holder panicked
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a cancellation scope for `id`. The entry is released when the
    /// returned guard is dropped, however the request ends.
    pub fn register(self: &Arc<Self>, id: RequestId) -> Registration {
        let token = self.parent.child_token();
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let previous = self.entries().insert(
            id.clone(),
            Entry {
                serial,
                token: token.clone(),
            },
        );
        if previous.is_some() {
            debug!(%id, "request id reused while still in flight");
        }
        Registration {
            registry: Arc::clone(self),
            id,
            serial,
            token,
        }
    }

    /// Cancel the request with `id`. Unknown or already finished requests are
    /// a no-op. Returns whether a running request was signalled.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let entry = self.entries().remove(id);
        match entry {
            Some(entry) => {
                // trigger outside the lock
                entry.token.cancel();
                debug!(%id, "cancelled request");
                true
            }
            None => {
                debug!(%id, "cancel for unknown or finished request ignored");
                false
            }
        }
    }

    fn release_entry(&self, id: &RequestId, serial: u64) {
        let mut entries = self.entries();
        if entries.get(id).is_some_and(|entry| entry.serial == serial) {
            entries.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Live registration of one request.
pub struct Registration {
    registry: Arc<CancellationRegistry>,
    id: RequestId,
    serial: u64,
    token: CancellationToken,
}

impl Registration {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Remove the entry without triggering its scope. An entry that now
    /// belongs to a newer request with the same id is left alone.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release_entry(&self.id, self.serial);
    }
}
