use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::RelayError;

/// Per-request credential slots. A credential is held for exactly the
/// lifetime of one in-flight request; the `HeldCredential` guard removes
/// the slot on drop, so release happens on success, handled errors, and
/// unwinding panics alike.
pub(crate) struct CredentialRelay {
    slots: Mutex<HashMap<u64, String>>,
    next_id: AtomicU64,
}

impl CredentialRelay {
    pub(crate) fn new() -> Arc<CredentialRelay> {
        Arc::new(CredentialRelay {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub(crate) fn hold(self: &Arc<CredentialRelay>, credential: String) -> HeldCredential {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id, credential);
        HeldCredential {
            relay: Arc::clone(self),
            request_id,
        }
    }

    pub(crate) fn current(&self, request_id: u64) -> Result<String, RelayError> {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&request_id)
            .cloned()
            .ok_or(RelayError::NotHeld)
    }

    /// Idempotent; double-release is harmless.
    pub(crate) fn release(&self, request_id: u64) {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&request_id);
    }

    #[cfg(test)]
    pub(crate) fn held_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub(crate) struct HeldCredential {
    relay: Arc<CredentialRelay>,
    request_id: u64,
}

impl HeldCredential {
    pub(crate) fn request_id(&self) -> u64 {
        self.request_id
    }
}

impl Drop for HeldCredential {
    fn drop(&mut self) {
        self.relay.release(self.request_id);
    }
}

/// Explicit per-request context threaded down the call chain. Tools and
/// clients obtain the credential only through this; no ambient globals.
pub(crate) struct RequestContext {
    user_id: String,
    held: HeldCredential,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub(crate) fn new(
        relay: &Arc<CredentialRelay>,
        user_id: &str,
        credential: String,
        timeout: Option<Duration>,
    ) -> RequestContext {
        RequestContext {
            user_id: user_id.to_string(),
            held: relay.hold(credential),
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    pub(crate) fn request_id(&self) -> u64 {
        self.held.request_id()
    }

    pub(crate) fn user_id(&self) -> &str {
        &self.user_id
    }

    pub(crate) fn credential(&self) -> Result<String, RelayError> {
        self.held.relay.current(self.held.request_id)
    }

    pub(crate) fn deadline_exceeded(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }
}
