//! Live DRM sessions and the resources they hold.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tdrm_proto::{DrmError, SessionHandle, SessionKind};
use tdrm_tee::{SharedMemory, TeeSessionId, TeeTransport};
use tracing::{trace, warn};

/// Default cap on concurrently open sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 64;

/// One open session.
pub struct SessionEntry {
    pub kind: SessionKind,
    pub tee_session: TeeSessionId,
    /// Shared block of a decrypt session.
    pub memory: Option<SharedMemory>,
    /// Usable length of the shared block.
    pub block_len: usize,
    busy: Mutex<()>,
    closed: AtomicBool,
}

impl SessionEntry {
    /// Exclusive use of the session's shared block.
    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.busy.lock()
    }

    /// True once the session's resources were released. Callers that looked
    /// the entry up before it was unregistered check this under `acquire`.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("kind", &self.kind)
            .field("tee_session", &self.tee_session)
            .field("memory", &self.memory.as_ref().map(|m| m.id))
            .field("block_len", &self.block_len)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct Slots {
    entries: HashMap<SessionHandle, Arc<SessionEntry>>,
    last: u32,
}

/// Handle table of the stub.
///
/// Handles are non-zero and handed out in increasing order, so a closed
/// handle is not reused until the counter wraps.
pub struct SessionRegistry {
    slots: Mutex<Slots>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        SessionRegistry {
            slots: Mutex::new(Slots {
                entries: HashMap::new(),
                last: 0,
            }),
            max_sessions,
        }
    }

    pub fn register(
        &self,
        kind: SessionKind,
        tee_session: TeeSessionId,
        memory: Option<SharedMemory>,
        block_len: usize,
    ) -> Result<SessionHandle, DrmError> {
        let mut slots = self.slots.lock();
        if slots.entries.len() >= self.max_sessions {
            warn!(max = self.max_sessions, "session table full");
            return Err(DrmError::OutOfMemory);
        }

        let handle = loop {
            slots.last = slots.last.wrapping_add(1);
            let candidate = SessionHandle(slots.last);
            if candidate.is_valid() && !slots.entries.contains_key(&candidate) {
                break candidate;
            }
        };
        slots.entries.insert(
            handle,
            Arc::new(SessionEntry {
                kind,
                tee_session,
                memory,
                block_len,
                busy: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        );
        trace!(session = %handle, ?kind, "session registered");
        Ok(handle)
    }

    pub fn lookup(&self, handle: SessionHandle) -> Result<Arc<SessionEntry>, DrmError> {
        self.slots
            .lock()
            .entries
            .get(&handle)
            .cloned()
            .ok_or(DrmError::SessionNotOpen)
    }

    /// Remove `handle` and release its shared block and secure-world session.
    ///
    /// Unknown and invalid handles are a no-op. Waits for an in-flight decrypt
    /// on the session to finish.
    pub fn unregister(
        &self,
        handle: SessionHandle,
        transport: &dyn TeeTransport,
    ) -> Result<(), DrmError> {
        let Some(entry) = self.slots.lock().entries.remove(&handle) else {
            return Ok(());
        };
        release(&entry, transport)?;
        trace!(session = %handle, "session unregistered");
        Ok(())
    }

    /// Remove every session, releasing their resources.
    pub fn clear(&self, transport: &dyn TeeTransport) -> usize {
        let entries: Vec<_> = self.slots.lock().entries.drain().collect();
        let count = entries.len();
        for (handle, entry) in entries {
            if let Err(e) = release(&entry, transport) {
                warn!(session = %handle, error = %e, "failed to release session");
            }
        }
        count
    }

    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn release(entry: &SessionEntry, transport: &dyn TeeTransport) -> Result<(), DrmError> {
    let _busy = entry.acquire();
    entry.closed.store(true, Ordering::Release);
    let mut first_error = None;
    if let Some(memory) = &entry.memory {
        if let Err(e) = transport.release_shared_memory(memory) {
            warn!(error = %e, "shared memory release failed");
            first_error.get_or_insert(DrmError::from(e));
        }
    }
    if let Err(e) = transport.close_session(entry.tee_session) {
        warn!(error = %e, "secure session close failed");
        first_error.get_or_insert(DrmError::from(e));
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_valid_and_unique() {
        let registry = SessionRegistry::new(8);
        let a = registry
            .register(SessionKind::Management, TeeSessionId(1), None, 0)
            .unwrap();
        let b = registry
            .register(SessionKind::Management, TeeSessionId(2), None, 0)
            .unwrap();
        assert!(a.is_valid() && b.is_valid());
        assert_ne!(a, b);
        assert_eq!(registry.lookup(a).unwrap().tee_session, TeeSessionId(1));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_lookup_unknown() {
        let registry = SessionRegistry::new(8);
        assert_eq!(
            registry.lookup(SessionHandle::INVALID).unwrap_err(),
            DrmError::SessionNotOpen
        );
        assert_eq!(
            registry.lookup(SessionHandle(42)).unwrap_err(),
            DrmError::SessionNotOpen
        );
    }

    #[test]
    fn test_capacity() {
        let registry = SessionRegistry::new(1);
        registry
            .register(SessionKind::Management, TeeSessionId(1), None, 0)
            .unwrap();
        assert_eq!(
            registry.register(SessionKind::Management, TeeSessionId(2), None, 0),
            Err(DrmError::OutOfMemory)
        );
    }
}
