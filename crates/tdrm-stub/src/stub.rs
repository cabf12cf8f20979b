//! The DRM stub: the client-facing DRM operations.
//!
//! Caller errors (not initialized, unknown session, bad ranges) are reported
//! before anything crosses into the secure world. Secure-world failures are
//! mapped through `DrmError::from(TeeError)`.

use std::sync::Arc;

use parking_lot::RwLock;
use tdrm_proto::{
    Command, DrmError, MemRegion, OpenRequest, SessionHandle, SessionKind, BLOCK_SIZE,
};
use tdrm_tee::{SharedBuffer, SharedMemory, TeeTransport, DRM_AGENT_UUID, DRM_STIPLET_UUID};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::StubConfig;
use crate::registry::SessionRegistry;

/// An open decrypt session and the block it decrypts in.
#[derive(Debug, Clone)]
pub struct DecryptSession {
    pub handle: SessionHandle,
    /// Shared block. Content is written here, decrypted in place, and read back.
    pub buffer: SharedBuffer,
}

/// Client stub of the DRM agent.
pub struct DrmStub {
    transport: Arc<dyn TeeTransport>,
    config: StubConfig,
    initialized: RwLock<bool>,
    sessions: SessionRegistry,
}

fn service_id(use_stiplet: bool) -> &'static Uuid {
    if use_stiplet {
        &DRM_STIPLET_UUID
    } else {
        &DRM_AGENT_UUID
    }
}

impl DrmStub {
    pub fn new(transport: Arc<dyn TeeTransport>, config: StubConfig) -> Self {
        let sessions = SessionRegistry::new(config.max_sessions);
        DrmStub {
            transport,
            config,
            initialized: RwLock::new(false),
            sessions,
        }
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.read()
    }

    /// Number of sessions currently open.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    /// Open the connection to the secure world.
    pub fn initialize(&self) -> Result<(), DrmError> {
        let mut initialized = self.initialized.write();
        if *initialized {
            return Err(DrmError::AlreadyInitialized);
        }
        self.transport.initialize_context().map_err(|e| {
            error!(error = %e, "cannot initialize the secure-world context");
            DrmError::from(e)
        })?;
        *initialized = true;
        info!("DRM stub initialized");
        Ok(())
    }

    /// Close the connection, tearing down any session left open.
    pub fn finalize(&self) -> Result<(), DrmError> {
        let mut initialized = self.initialized.write();
        if !*initialized {
            return Err(DrmError::NotInitialized);
        }
        let leftover = self.sessions.clear(self.transport.as_ref());
        if leftover > 0 {
            warn!(sessions = leftover, "finalize closed sessions still open");
        }
        if let Err(e) = self.transport.finalize_context() {
            warn!(error = %e, "secure-world context finalize failed");
        }
        *initialized = false;
        info!("DRM stub finalized");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Management sessions
    // ------------------------------------------------------------------------

    pub fn open_management_session(&self, use_stiplet: bool) -> Result<SessionHandle, DrmError> {
        let initialized = self.initialized.read();
        if !*initialized {
            return Err(DrmError::NotInitialized);
        }

        let kind = SessionKind::Management;
        let tee_session = self
            .transport
            .open_session(service_id(use_stiplet), kind.login_method(), OpenRequest::Management)
            .map_err(|e| {
                error!(error = %e, use_stiplet, "cannot open management session");
                DrmError::from(e)
            })?;

        match self.sessions.register(kind, tee_session, None, 0) {
            Ok(handle) => {
                debug!(session = %handle, use_stiplet, "management session opened");
                Ok(handle)
            }
            Err(e) => {
                if let Err(close) = self.transport.close_session(tee_session) {
                    warn!(error = %close, "rollback close failed");
                }
                Err(e)
            }
        }
    }

    pub fn close_management_session(&self, handle: SessionHandle) -> Result<(), DrmError> {
        let initialized = self.initialized.read();
        if !*initialized {
            return Err(DrmError::NotInitialized);
        }
        let entry = self.sessions.lookup(handle)?;
        if entry.kind != SessionKind::Management {
            error!(session = %handle, "not a management session");
            return Err(DrmError::IllegalArgument);
        }
        self.sessions.unregister(handle, self.transport.as_ref())?;
        debug!(session = %handle, "management session closed");
        Ok(())
    }

    /// Install the device root key.
    pub fn management_init(&self, handle: SessionHandle) -> Result<(), DrmError> {
        self.management_command(handle, Command::Init)
    }

    /// Erase every object from the agent's key store.
    pub fn management_clean(&self, handle: SessionHandle) -> Result<(), DrmError> {
        self.management_command(handle, Command::Clean)
    }

    fn management_command(&self, handle: SessionHandle, command: Command) -> Result<(), DrmError> {
        let initialized = self.initialized.read();
        if !*initialized {
            return Err(DrmError::NotInitialized);
        }
        let entry = self.sessions.lookup(handle)?;
        let _busy = entry.acquire();
        if entry.is_closed() {
            return Err(DrmError::SessionNotOpen);
        }
        self.transport
            .invoke_command(entry.tee_session, command)
            .map_err(|e| {
                debug!(session = %handle, command = ?command.id(), error = %e, "command failed");
                DrmError::from(e)
            })
    }

    // ------------------------------------------------------------------------
    // Decrypt sessions
    // ------------------------------------------------------------------------

    /// Open a decrypt session for the license `encrypted_key`.
    ///
    /// With `buffer == None` a shared block of `buffer_len` bytes is allocated;
    /// otherwise the first `buffer_len` bytes of the caller's buffer are used.
    /// If the block cannot be set up, the secure session opened for it is
    /// closed again before returning.
    pub fn open_decrypt_session(
        &self,
        encrypted_key: &[u8],
        buffer: Option<SharedBuffer>,
        buffer_len: usize,
        use_stiplet: bool,
    ) -> Result<DecryptSession, DrmError> {
        let initialized = self.initialized.read();
        if !*initialized {
            return Err(DrmError::NotInitialized);
        }
        if buffer_len < BLOCK_SIZE {
            error!(buffer_len, "decrypt block smaller than the cipher block");
            return Err(DrmError::IllegalArgument);
        }
        if let Some(buffer) = &buffer {
            if buffer.len() < buffer_len {
                error!(buffer_len, actual = buffer.len(), "caller buffer is too small");
                return Err(DrmError::IllegalArgument);
            }
        }

        let kind = SessionKind::Decrypt;
        let tee_session = self
            .transport
            .open_session(
                service_id(use_stiplet),
                kind.login_method(),
                OpenRequest::Decrypt {
                    encrypted_key,
                    signature: &self.config.manifest,
                },
            )
            .map_err(|e| {
                error!(error = %e, use_stiplet, "cannot open decrypt session");
                DrmError::from(e)
            })?;

        let memory = match &buffer {
            None => self.transport.allocate_shared_memory(buffer_len),
            Some(buffer) => self.transport.register_shared_memory(buffer),
        };
        let memory: SharedMemory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                error!(error = %e, "cannot set up the shared block; closing the secure session");
                if let Err(close) = self.transport.close_session(tee_session) {
                    warn!(error = %close, "rollback close failed");
                }
                return Err(DrmError::from(e));
            }
        };

        let buffer = memory.buffer.clone();
        match self
            .sessions
            .register(kind, tee_session, Some(memory.clone()), buffer_len)
        {
            Ok(handle) => {
                debug!(session = %handle, buffer_len, use_stiplet, "decrypt session opened");
                Ok(DecryptSession { handle, buffer })
            }
            Err(e) => {
                if let Err(release) = self.transport.release_shared_memory(&memory) {
                    warn!(error = %release, "rollback release failed");
                }
                if let Err(close) = self.transport.close_session(tee_session) {
                    warn!(error = %close, "rollback close failed");
                }
                Err(e)
            }
        }
    }

    /// Close a decrypt session. Closing [`SessionHandle::INVALID`] or a
    /// session that is already closed succeeds.
    pub fn close_decrypt_session(&self, handle: SessionHandle) -> Result<(), DrmError> {
        let initialized = self.initialized.read();
        if !*initialized {
            return Err(DrmError::NotInitialized);
        }
        let entry = match self.sessions.lookup(handle) {
            Ok(entry) => entry,
            Err(_) => return Ok(()),
        };
        if entry.kind != SessionKind::Decrypt {
            error!(session = %handle, "not a decrypt session");
            return Err(DrmError::IllegalArgument);
        }
        self.sessions.unregister(handle, self.transport.as_ref())?;
        debug!(session = %handle, "decrypt session closed");
        Ok(())
    }

    /// Decrypt `length` bytes of the session's block in place, starting at
    /// `offset`. `length` must be a multiple of [`BLOCK_SIZE`].
    pub fn decrypt(&self, handle: SessionHandle, offset: usize, length: usize) -> Result<(), DrmError> {
        let initialized = self.initialized.read();
        if !*initialized {
            return Err(DrmError::NotInitialized);
        }
        let entry = self.sessions.lookup(handle)?;
        let Some(memory) = &entry.memory else {
            error!(session = %handle, "not a decrypt session");
            return Err(DrmError::IllegalArgument);
        };
        if length % BLOCK_SIZE != 0 {
            error!(length, "decrypt length is not a multiple of the block size");
            return Err(DrmError::IllegalArgument);
        }
        match offset.checked_add(length) {
            Some(end) if end <= entry.block_len => {}
            _ => {
                error!(offset, length, block_len = entry.block_len, "decrypt range outside the block");
                return Err(DrmError::IllegalArgument);
            }
        }
        if length == 0 {
            return Ok(());
        }

        let region = MemRegion {
            memory: memory.id,
            offset,
            length,
        };
        let _busy = entry.acquire();
        if entry.is_closed() {
            return Err(DrmError::SessionNotOpen);
        }
        self.transport
            .invoke_command(
                entry.tee_session,
                Command::Decrypt {
                    input: region,
                    output: region,
                },
            )
            .map_err(|e| {
                error!(session = %handle, error = %e, "decrypt failed");
                DrmError::from(e)
            })
    }
}

impl Drop for DrmStub {
    fn drop(&mut self) {
        if *self.initialized.get_mut() {
            warn!("DRM stub dropped while initialized");
            if let Err(e) = self.finalize() {
                warn!(error = %e, "finalize on drop failed");
            }
        }
    }
}
