//! In-process secure world.
//!
//! [`LocalTee`] hosts [`TrustedService`]s behind the [`TeeTransport`]
//! interface. It models the parts of a real secure world the DRM protocol
//! depends on:
//! - one client context at a time, reference counted
//! - client identities built from the login method and manifest
//! - per-session serialization of commands
//! - shared memory with a byte budget and exclusive buffer registration
//! - update shortcuts that serve a command without entering the service

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tdrm_proto::{Command, CommandId, LoginMethod, MemRegion, OpenRequest, SharedMemoryId, TeeError};
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::identity::{ClientIdentity, ClientManifest};
use crate::memory::{SharedBuffer, SharedMemory};
use crate::service::{ShortcutPolicy, ShortcutRegistrar, TrustedService, UpdateShortcut};
use crate::transport::{TeeSessionId, TeeTransport};

/// Default shared memory budget: 1 MiB.
pub const DEFAULT_MAX_SHARED_MEMORY: usize = 1024 * 1024;

/// [`LocalTee`] settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTeeConfig {
    /// Total bytes of shared memory that may be allocated or registered at once.
    pub max_shared_memory: usize,
    pub shortcut_policy: ShortcutPolicy,
}

impl Default for LocalTeeConfig {
    fn default() -> Self {
        LocalTeeConfig {
            max_shared_memory: DEFAULT_MAX_SHARED_MEMORY,
            shortcut_policy: ShortcutPolicy::Enabled,
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters of calls into the secure world.
#[derive(Debug, Default)]
pub struct TeeStats {
    /// Every transport call, successful or not
    pub calls: AtomicU64,
    pub sessions_opened: AtomicU64,
    pub sessions_closed: AtomicU64,
    /// Commands that reached a service
    pub service_commands: AtomicU64,
    /// Commands served by an update shortcut
    pub shortcut_hits: AtomicU64,
}

impl TeeStats {
    pub fn snapshot(&self) -> TeeStatsSnapshot {
        TeeStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            service_commands: self.service_commands.load(Ordering::Relaxed),
            shortcut_hits: self.shortcut_hits.load(Ordering::Relaxed),
        }
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`TeeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeeStatsSnapshot {
    pub calls: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub service_commands: u64,
    pub shortcut_hits: u64,
}

// ============================================================================
// State
// ============================================================================

type InstalledShortcut = (CommandId, Box<dyn UpdateShortcut>);

struct HostedSession<S: TrustedService> {
    service: Arc<S>,
    /// `None` once the session has been closed.
    context: Option<S::Session>,
    shortcut: Option<InstalledShortcut>,
}

impl<S: TrustedService> HostedSession<S> {
    fn close(&mut self) {
        // The shortcut may reference the session's resources; drop it first.
        self.shortcut = None;
        if let Some(context) = self.context.take() {
            self.service.close_session(context);
        }
    }
}

struct TeeState<S: TrustedService> {
    contexts: u32,
    client_id: Uuid,
    sessions: HashMap<TeeSessionId, Arc<Mutex<HostedSession<S>>>>,
    memory: HashMap<SharedMemoryId, SharedMemory>,
    memory_used: usize,
    next_session: u32,
    next_memory: u32,
}

impl<S: TrustedService> TeeState<S> {
    fn new() -> Self {
        TeeState {
            contexts: 0,
            client_id: Uuid::nil(),
            sessions: HashMap::new(),
            memory: HashMap::new(),
            memory_used: 0,
            next_session: 0,
            next_memory: 0,
        }
    }

    fn require_context(&self) -> Result<(), TeeError> {
        if self.contexts == 0 {
            return Err(TeeError::BadState);
        }
        Ok(())
    }

    fn next_session_id(&mut self) -> TeeSessionId {
        loop {
            self.next_session = self.next_session.wrapping_add(1).max(1);
            let id = TeeSessionId(self.next_session);
            if !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }

    fn next_memory_id(&mut self) -> SharedMemoryId {
        loop {
            self.next_memory = self.next_memory.wrapping_add(1).max(1);
            let id = SharedMemoryId(self.next_memory);
            if !self.memory.contains_key(&id) {
                return id;
            }
        }
    }

    fn reserve_memory(&mut self, len: usize, budget: usize) -> Result<(), TeeError> {
        if len == 0 {
            return Err(TeeError::BadParameters);
        }
        let total = self.memory_used.checked_add(len).ok_or(TeeError::OutOfMemory)?;
        if total > budget {
            warn!(requested = len, in_use = self.memory_used, budget, "shared memory budget exceeded");
            return Err(TeeError::OutOfMemory);
        }
        self.memory_used = total;
        Ok(())
    }
}

// ============================================================================
// LocalTee
// ============================================================================

/// Secure world running in the caller's process.
pub struct LocalTee<S: TrustedService> {
    services: HashMap<Uuid, Arc<S>>,
    config: LocalTeeConfig,
    state: Mutex<TeeState<S>>,
    stats: TeeStats,
}

impl<S: TrustedService> LocalTee<S> {
    pub fn new(config: LocalTeeConfig) -> Self {
        LocalTee {
            services: HashMap::new(),
            config,
            state: Mutex::new(TeeState::new()),
            stats: TeeStats::default(),
        }
    }

    /// Install `service` under `id`, calling its `create` hook.
    pub fn with_service(mut self, id: Uuid, service: S) -> Result<Self, TeeError> {
        if self.services.contains_key(&id) {
            return Err(TeeError::BadParameters);
        }
        service.create()?;
        debug!(service = %id, "trusted service created");
        self.services.insert(id, Arc::new(service));
        Ok(self)
    }

    pub fn service(&self, id: &Uuid) -> Option<&Arc<S>> {
        self.services.get(id)
    }

    pub fn config(&self) -> &LocalTeeConfig {
        &self.config
    }

    pub fn stats(&self) -> TeeStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn open_session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Bytes of shared memory currently allocated or registered.
    pub fn shared_memory_in_use(&self) -> usize {
        self.state.lock().memory_used
    }

    fn run_shortcut(
        &self,
        shortcut: &mut dyn UpdateShortcut,
        input: MemRegion,
        output: MemRegion,
    ) -> Result<(), TeeError> {
        if input != output {
            error!(?input, ?output, "shortcut requires the input and output regions to coincide");
            return Err(TeeError::BadParameters);
        }
        let end = input.end()?;

        let buffer = {
            let state = self.state.lock();
            let memory = state.memory.get(&input.memory).ok_or_else(|| {
                error!(memory = input.memory.0, "unknown shared memory");
                TeeError::BadParameters
            })?;
            if end > memory.len {
                error!(end, len = memory.len, "region exceeds shared memory");
                return Err(TeeError::BadParameters);
            }
            memory.buffer.clone()
        };

        let mut bytes = buffer.lock();
        let data = bytes.get_mut(input.offset..end).ok_or(TeeError::BadParameters)?;
        shortcut.update(data)?;
        TeeStats::inc(&self.stats.shortcut_hits);
        trace!(offset = input.offset, length = input.length, "command served by shortcut");
        Ok(())
    }

    fn close_all(&self) {
        let (sessions, memory) = {
            let mut state = self.state.lock();
            let sessions: Vec<_> = state.sessions.drain().collect();
            let memory = state.memory.len();
            state.memory.clear();
            state.memory_used = 0;
            (sessions, memory)
        };
        if !sessions.is_empty() || memory > 0 {
            warn!(sessions = sessions.len(), memory, "closing resources left open by the client");
        }
        for (_, hosted) in sessions {
            hosted.lock().close();
            TeeStats::inc(&self.stats.sessions_closed);
        }
    }
}

impl<S: TrustedService> TeeTransport for LocalTee<S> {
    fn initialize_context(&self) -> Result<(), TeeError> {
        TeeStats::inc(&self.stats.calls);
        let mut state = self.state.lock();
        if state.contexts == 0 {
            state.client_id = Uuid::new_v4();
        }
        state.contexts += 1;
        debug!(client = %state.client_id, contexts = state.contexts, "client context initialized");
        Ok(())
    }

    fn finalize_context(&self) -> Result<(), TeeError> {
        TeeStats::inc(&self.stats.calls);
        let remaining = {
            let mut state = self.state.lock();
            state.require_context()?;
            state.contexts -= 1;
            state.contexts
        };
        if remaining == 0 {
            self.close_all();
        }
        debug!(contexts = remaining, "client context finalized");
        Ok(())
    }

    fn open_session(
        &self,
        service_id: &Uuid,
        login: LoginMethod,
        request: OpenRequest<'_>,
    ) -> Result<TeeSessionId, TeeError> {
        TeeStats::inc(&self.stats.calls);
        let client_id = {
            let state = self.state.lock();
            state.require_context()?;
            state.client_id
        };
        let service = self.services.get(service_id).cloned().ok_or_else(|| {
            warn!(service = %service_id, "no such trusted service");
            TeeError::ItemNotFound
        })?;

        let manifest = match (login, request) {
            (LoginMethod::Authentication, OpenRequest::Decrypt { signature, .. }) => {
                Some(ClientManifest::parse(signature).map_err(|e| {
                    warn!(error = %e, "rejecting client manifest");
                    TeeError::AccessDenied
                })?)
            }
            (LoginMethod::Authentication, OpenRequest::Management) => {
                warn!("authentication login without a manifest");
                return Err(TeeError::AccessDenied);
            }
            _ => None,
        };
        let identity = ClientIdentity::new(client_id, login, manifest.as_ref());

        let mut registrar = ShortcutRegistrar::new(self.config.shortcut_policy);
        let context = service.open_session(&identity, request, &mut registrar)?;

        let hosted = HostedSession {
            service,
            context: Some(context),
            shortcut: registrar.into_installed(),
        };
        let id = {
            let mut state = self.state.lock();
            let id = state.next_session_id();
            state.sessions.insert(id, Arc::new(Mutex::new(hosted)));
            id
        };
        TeeStats::inc(&self.stats.sessions_opened);
        debug!(session = %id, service = %service_id, ?login, kind = ?request.kind(), "session opened");
        Ok(id)
    }

    fn invoke_command(&self, session: TeeSessionId, command: Command) -> Result<(), TeeError> {
        TeeStats::inc(&self.stats.calls);
        let hosted = {
            let state = self.state.lock();
            state.require_context()?;
            state.sessions.get(&session).cloned().ok_or(TeeError::ItemNotFound)?
        };

        let mut hosted = hosted.lock();
        let HostedSession {
            service,
            context,
            shortcut,
        } = &mut *hosted;
        let context = context.as_mut().ok_or(TeeError::BadState)?;

        if let (Some((target, handler)), Command::Decrypt { input, output }) = (shortcut.as_mut(), command) {
            if *target == command.id() {
                return self.run_shortcut(&mut **handler, input, output);
            }
        }

        TeeStats::inc(&self.stats.service_commands);
        trace!(session = %session, ?command, "dispatching command to service");
        service.invoke_command(context, command)
    }

    fn close_session(&self, session: TeeSessionId) -> Result<(), TeeError> {
        TeeStats::inc(&self.stats.calls);
        let hosted = {
            let mut state = self.state.lock();
            state.require_context()?;
            state.sessions.remove(&session).ok_or(TeeError::ItemNotFound)?
        };
        hosted.lock().close();
        TeeStats::inc(&self.stats.sessions_closed);
        debug!(session = %session, "session closed");
        Ok(())
    }

    fn allocate_shared_memory(&self, len: usize) -> Result<SharedMemory, TeeError> {
        TeeStats::inc(&self.stats.calls);
        let mut state = self.state.lock();
        state.require_context()?;
        state.reserve_memory(len, self.config.max_shared_memory)?;

        let memory = SharedMemory {
            id: state.next_memory_id(),
            len,
            owned: true,
            buffer: SharedBuffer::new(len),
        };
        state.memory.insert(memory.id, memory.clone());
        trace!(memory = memory.id.0, len, "shared memory allocated");
        Ok(memory)
    }

    fn register_shared_memory(&self, buffer: &SharedBuffer) -> Result<SharedMemory, TeeError> {
        TeeStats::inc(&self.stats.calls);
        let mut state = self.state.lock();
        state.require_context()?;
        if state.memory.values().any(|m| m.buffer.same_as(buffer)) {
            warn!("buffer is already registered");
            return Err(TeeError::BadState);
        }
        let len = buffer.len();
        state.reserve_memory(len, self.config.max_shared_memory)?;

        let memory = SharedMemory {
            id: state.next_memory_id(),
            len,
            owned: false,
            buffer: buffer.clone(),
        };
        state.memory.insert(memory.id, memory.clone());
        trace!(memory = memory.id.0, len, "shared memory registered");
        Ok(memory)
    }

    fn release_shared_memory(&self, memory: &SharedMemory) -> Result<(), TeeError> {
        TeeStats::inc(&self.stats.calls);
        let mut state = self.state.lock();
        state.require_context()?;
        let released = state.memory.remove(&memory.id).ok_or(TeeError::ItemNotFound)?;
        state.memory_used = state.memory_used.saturating_sub(released.len);
        trace!(memory = memory.id.0, "shared memory released");
        Ok(())
    }
}

impl<S: TrustedService> Drop for LocalTee<S> {
    fn drop(&mut self) {
        self.close_all();
        for (id, service) in self.services.drain() {
            service.destroy();
            debug!(service = %id, "trusted service destroyed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const ECHO: Uuid = Uuid::from_u128(0x1);

    /// Service that records calls and installs an XOR shortcut for DECRYPT.
    #[derive(Default)]
    struct EchoService {
        closed: AtomicUsize,
        destroyed: AtomicUsize,
        last_login: Mutex<Option<u32>>,
    }

    struct XorShortcut;

    impl UpdateShortcut for XorShortcut {
        fn update(&mut self, data: &mut [u8]) -> Result<(), TeeError> {
            data.iter_mut().for_each(|b| *b ^= 0xFF);
            Ok(())
        }
    }

    impl TrustedService for EchoService {
        type Session = ();

        fn create(&self) -> Result<(), TeeError> {
            Ok(())
        }

        fn destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }

        fn open_session(
            &self,
            client: &ClientIdentity,
            request: OpenRequest<'_>,
            shortcuts: &mut ShortcutRegistrar,
        ) -> Result<(), TeeError> {
            *self.last_login.lock() = client.login_property();
            if let OpenRequest::Decrypt { .. } = request {
                if !client.property_bool("echo.allow") {
                    return Err(TeeError::AccessDenied);
                }
                shortcuts.activate(CommandId::Decrypt, Box::new(XorShortcut))?;
            }
            Ok(())
        }

        fn invoke_command(&self, _session: &mut (), command: Command) -> Result<(), TeeError> {
            match command {
                Command::Decrypt { .. } => Err(TeeError::BadState),
                _ => Ok(()),
            }
        }

        fn close_session(&self, _session: ()) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tee(config: LocalTeeConfig) -> LocalTee<EchoService> {
        let tee = LocalTee::new(config)
            .with_service(ECHO, EchoService::default())
            .unwrap();
        tee.initialize_context().unwrap();
        tee
    }

    fn manifest() -> Vec<u8> {
        ClientManifest::new().with("echo.allow", "true").to_bytes()
    }

    fn decrypt_request(signature: &[u8]) -> OpenRequest<'_> {
        OpenRequest::Decrypt {
            encrypted_key: &[],
            signature,
        }
    }

    fn region(memory: SharedMemoryId, offset: usize, length: usize) -> MemRegion {
        MemRegion {
            memory,
            offset,
            length,
        }
    }

    #[test]
    fn test_requires_context() {
        let tee = LocalTee::new(LocalTeeConfig::default())
            .with_service(ECHO, EchoService::default())
            .unwrap();
        assert_eq!(
            tee.open_session(&ECHO, LoginMethod::Application, OpenRequest::Management),
            Err(TeeError::BadState)
        );
        assert_eq!(tee.allocate_shared_memory(16).unwrap_err(), TeeError::BadState);
        assert_eq!(tee.finalize_context(), Err(TeeError::BadState));
        assert_eq!(tee.stats().calls, 3);
    }

    #[test]
    fn test_unknown_service() {
        let tee = tee(LocalTeeConfig::default());
        assert_eq!(
            tee.open_session(&Uuid::from_u128(9), LoginMethod::Application, OpenRequest::Management),
            Err(TeeError::ItemNotFound)
        );
    }

    #[test]
    fn test_login_property_reaches_service() {
        let tee = tee(LocalTeeConfig::default());
        tee.open_session(&ECHO, LoginMethod::Application, OpenRequest::Management)
            .unwrap();
        let service = tee.service(&ECHO).unwrap();
        assert_eq!(*service.last_login.lock(), Some(LoginMethod::Application.as_u32()));
    }

    #[test]
    fn test_authentication_requires_manifest() {
        let tee = tee(LocalTeeConfig::default());
        assert_eq!(
            tee.open_session(&ECHO, LoginMethod::Authentication, OpenRequest::Management),
            Err(TeeError::AccessDenied)
        );
        assert_eq!(
            tee.open_session(&ECHO, LoginMethod::Authentication, decrypt_request(b"garbage")),
            Err(TeeError::AccessDenied)
        );
        // Valid manifest, but without the property the service wants
        assert_eq!(
            tee.open_session(&ECHO, LoginMethod::Authentication, decrypt_request(b"other: 1")),
            Err(TeeError::AccessDenied)
        );
        assert_eq!(tee.open_session_count(), 0);
    }

    #[test]
    fn test_shortcut_serves_decrypt() {
        let tee = tee(LocalTeeConfig::default());
        let signature = manifest();
        let session = tee
            .open_session(&ECHO, LoginMethod::Authentication, decrypt_request(&signature))
            .unwrap();
        let memory = tee.allocate_shared_memory(32).unwrap();
        memory.buffer.write_at(16, &[0x0F; 16]).unwrap();

        let r = region(memory.id, 16, 16);
        tee.invoke_command(session, Command::Decrypt { input: r, output: r })
            .unwrap();
        assert_eq!(memory.buffer.read_at(16, 16).unwrap(), vec![0xF0; 16]);
        assert_eq!(memory.buffer.read_at(0, 16).unwrap(), vec![0; 16]);

        let stats = tee.stats();
        assert_eq!(stats.shortcut_hits, 1);
        assert_eq!(stats.service_commands, 0);
    }

    #[test]
    fn test_shortcut_region_checks() {
        let tee = tee(LocalTeeConfig::default());
        let signature = manifest();
        let session = tee
            .open_session(&ECHO, LoginMethod::Authentication, decrypt_request(&signature))
            .unwrap();
        let memory = tee.allocate_shared_memory(32).unwrap();

        let a = region(memory.id, 0, 16);
        let b = region(memory.id, 16, 16);
        assert_eq!(
            tee.invoke_command(session, Command::Decrypt { input: a, output: b }),
            Err(TeeError::BadParameters)
        );
        let past_end = region(memory.id, 16, 32);
        assert_eq!(
            tee.invoke_command(session, Command::Decrypt { input: past_end, output: past_end }),
            Err(TeeError::BadParameters)
        );
        let unknown = region(SharedMemoryId(999), 0, 16);
        assert_eq!(
            tee.invoke_command(session, Command::Decrypt { input: unknown, output: unknown }),
            Err(TeeError::BadParameters)
        );
    }

    #[test]
    fn test_bypassed_shortcut_reaches_service() {
        let tee = tee(LocalTeeConfig {
            shortcut_policy: ShortcutPolicy::Bypassed,
            ..LocalTeeConfig::default()
        });
        let signature = manifest();
        let session = tee
            .open_session(&ECHO, LoginMethod::Authentication, decrypt_request(&signature))
            .unwrap();
        let memory = tee.allocate_shared_memory(16).unwrap();
        let r = region(memory.id, 0, 16);
        assert_eq!(
            tee.invoke_command(session, Command::Decrypt { input: r, output: r }),
            Err(TeeError::BadState)
        );
        assert_eq!(tee.stats().service_commands, 1);
    }

    #[test]
    fn test_refused_shortcut_fails_open() {
        let tee = tee(LocalTeeConfig {
            shortcut_policy: ShortcutPolicy::Refused,
            ..LocalTeeConfig::default()
        });
        let signature = manifest();
        assert!(tee
            .open_session(&ECHO, LoginMethod::Authentication, decrypt_request(&signature))
            .is_err());
        assert_eq!(tee.open_session_count(), 0);
    }

    #[test]
    fn test_memory_budget_and_registration() {
        let tee = tee(LocalTeeConfig {
            max_shared_memory: 64,
            ..LocalTeeConfig::default()
        });
        let a = tee.allocate_shared_memory(48).unwrap();
        assert_eq!(tee.allocate_shared_memory(32).unwrap_err(), TeeError::OutOfMemory);
        assert_eq!(tee.allocate_shared_memory(0).unwrap_err(), TeeError::BadParameters);

        let caller = SharedBuffer::new(16);
        let registered = tee.register_shared_memory(&caller).unwrap();
        assert!(!registered.owned);
        assert_eq!(tee.register_shared_memory(&caller).unwrap_err(), TeeError::BadState);
        assert_eq!(tee.shared_memory_in_use(), 64);

        tee.release_shared_memory(&a).unwrap();
        tee.release_shared_memory(&registered).unwrap();
        assert_eq!(tee.release_shared_memory(&a), Err(TeeError::ItemNotFound));
        assert_eq!(tee.shared_memory_in_use(), 0);
        // Released buffers can be registered again
        assert!(tee.register_shared_memory(&caller).is_ok());
    }

    #[test]
    fn test_close_and_finalize() {
        let tee = tee(LocalTeeConfig::default());
        let first = tee
            .open_session(&ECHO, LoginMethod::Application, OpenRequest::Management)
            .unwrap();
        tee.open_session(&ECHO, LoginMethod::Application, OpenRequest::Management)
            .unwrap();

        tee.close_session(first).unwrap();
        assert_eq!(tee.close_session(first), Err(TeeError::ItemNotFound));
        assert_eq!(tee.invoke_command(first, Command::Init), Err(TeeError::ItemNotFound));

        tee.finalize_context().unwrap();
        assert_eq!(tee.open_session_count(), 0);
        assert_eq!(tee.service(&ECHO).unwrap().closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let result = LocalTee::new(LocalTeeConfig::default())
            .with_service(ECHO, EchoService::default())
            .unwrap()
            .with_service(ECHO, EchoService::default());
        assert!(matches!(result, Err(TeeError::BadParameters)));
    }
}
