//! The DRM agent.
//!
//! Sessions come in two kinds, fixed at open time:
//! - management sessions run `INIT` and `CLEAN` against a read-write key
//!   store session
//! - decrypt sessions unwrap a session key with the device key, start an
//!   AES-CBC operation with it and hand `DECRYPT` to an update shortcut
//!
//! A `DECRYPT` command that reaches the agent means the shortcut is not in
//! place, and is refused with `BadState`.

use tdrm_keystore::{
    CryptokiError, KeyStore, KeyTemplate, Mechanism, ObjectFilter, ObjectHandle, SessionFlags,
    StoreSession,
};
use tdrm_proto::{Command, CommandId, LoginMethod, OpenRequest, SessionKind, TeeError};
use tdrm_tee::{ClientIdentity, ShortcutRegistrar, TrustedService, UpdateShortcut};
use tracing::{debug, error, trace, warn};

use crate::config::{ConfigError, ServiceConfig};
use crate::device_key::DeviceKeyMaterial;

fn crypto_failure(context: &'static str) -> impl Fn(CryptokiError) -> TeeError {
    move |e| {
        error!(error = %e, "{}", context);
        TeeError::Crypto
    }
}

// ============================================================================
// Scoped key store resources
// ============================================================================

/// A logged-in key store session. Dropping it logs out and closes the session.
struct StoreGuard {
    store: KeyStore,
    session: StoreSession,
}

impl StoreGuard {
    fn open(store: &KeyStore, flags: SessionFlags) -> Result<Self, TeeError> {
        let session = store
            .open_session(flags)
            .map_err(crypto_failure("cannot open key store session"))?;
        if let Err(e) = store.login(session) {
            error!(error = %e, "key store login failed");
            let _ = store.close_session(session);
            return Err(TeeError::Crypto);
        }
        Ok(StoreGuard {
            store: store.clone(),
            session,
        })
    }
}

impl Drop for StoreGuard {
    fn drop(&mut self) {
        if let Err(e) = self.store.logout(self.session) {
            debug!(error = %e, "key store logout failed");
        }
        if let Err(e) = self.store.close_session(self.session) {
            debug!(error = %e, "key store session close failed");
        }
    }
}

/// A freshly created session key, destroyed on drop unless disarmed.
struct KeyGuard<'a> {
    guard: &'a StoreGuard,
    handle: ObjectHandle,
    armed: bool,
}

impl KeyGuard<'_> {
    fn disarm(mut self) -> ObjectHandle {
        self.armed = false;
        self.handle
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.guard.store.destroy_object(self.guard.session, self.handle) {
                error!(error = %e, "cannot destroy session key during unwind");
            }
        }
    }
}

/// Serves `DECRYPT` straight from the session's AES-CBC operation.
struct CbcShortcut {
    store: KeyStore,
    session: StoreSession,
}

impl UpdateShortcut for CbcShortcut {
    fn update(&mut self, data: &mut [u8]) -> Result<(), TeeError> {
        self.store
            .decrypt_update(self.session, data)
            .map_err(crypto_failure("content decryption failed"))
    }
}

// ============================================================================
// Sessions
// ============================================================================

pub struct ManagementSession {
    store: StoreGuard,
}

pub struct DecryptSession {
    store: StoreGuard,
    session_key: ObjectHandle,
}

/// Server-side context of one agent session.
pub enum AgentSession {
    Management(ManagementSession),
    Decrypt(DecryptSession),
}

impl AgentSession {
    pub fn kind(&self) -> SessionKind {
        match self {
            AgentSession::Management(_) => SessionKind::Management,
            AgentSession::Decrypt(_) => SessionKind::Decrypt,
        }
    }
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentSession::Management(s) => f
                .debug_struct("Management")
                .field("store_session", &s.store.session)
                .finish(),
            AgentSession::Decrypt(s) => f
                .debug_struct("Decrypt")
                .field("store_session", &s.store.session)
                .field("session_key", &s.session_key)
                .finish(),
        }
    }
}

// ============================================================================
// DrmService
// ============================================================================

/// The DRM agent trusted service.
pub struct DrmService {
    store: KeyStore,
    config: ServiceConfig,
    device_key: DeviceKeyMaterial,
}

impl DrmService {
    /// Agent over `store` with the default configuration and built-in device key.
    pub fn new(store: KeyStore) -> Self {
        DrmService {
            store,
            config: ServiceConfig::default(),
            device_key: DeviceKeyMaterial::builtin(),
        }
    }

    /// Agent with a custom configuration and device key. The configuration
    /// is validated, and the device key must match its unwrap scheme.
    pub fn with_config(
        store: KeyStore,
        config: ServiceConfig,
        device_key: DeviceKeyMaterial,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if device_key.modulus_len() != config.unwrap.modulus_len {
            return Err(ConfigError::ValidationError(format!(
                "device key modulus is {} bytes but the unwrap scheme expects {}",
                device_key.modulus_len(),
                config.unwrap.modulus_len
            )));
        }
        Ok(DrmService {
            store,
            config,
            device_key,
        })
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn may_decrypt(&self, client: &ClientIdentity) -> bool {
        client.login_property() == Some(LoginMethod::Authentication.as_u32())
            && client.property_bool(&self.config.decrypt_right_property)
    }

    fn open_management(&self) -> Result<ManagementSession, TeeError> {
        let store = StoreGuard::open(&self.store, SessionFlags::READ_WRITE)?;
        debug!(store_session = store.session.0, "management session opened");
        Ok(ManagementSession { store })
    }

    fn open_decrypt(
        &self,
        client: &ClientIdentity,
        encrypted_key: &[u8],
        shortcuts: &mut ShortcutRegistrar,
    ) -> Result<DecryptSession, TeeError> {
        if !self.may_decrypt(client) {
            error!(client = %client.client_id, "client has no decryption rights");
            return Err(TeeError::AccessDenied);
        }
        if encrypted_key.is_empty() {
            error!("empty encrypted key");
            return Err(TeeError::BadParameters);
        }

        let store = StoreGuard::open(&self.store, SessionFlags::READ_ONLY)?;
        let session = store.session;

        let device_key = self
            .store
            .find_objects(session, &ObjectFilter::Id(self.config.device_key_id.clone()), 1)
            .map_err(crypto_failure("cannot search for the device key"))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                error!(id = %self.config.device_key_id, "device key not found");
                TeeError::Crypto
            })?;

        let scheme = self.config.unwrap;
        if encrypted_key.len() != scheme.modulus_len {
            error!(
                len = encrypted_key.len(),
                expected = scheme.modulus_len,
                "encrypted key has the wrong size"
            );
            return Err(TeeError::Crypto);
        }

        self.store
            .decrypt_init(session, Mechanism::RsaX509, device_key)
            .map_err(crypto_failure("cannot initialize license decryption"))?;
        let clear = self
            .store
            .decrypt(session, encrypted_key)
            .map_err(crypto_failure("license decryption failed"))?;
        if clear.len() < scheme.session_key_len {
            error!(len = clear.len(), "decrypted license is too short");
            return Err(TeeError::Crypto);
        }

        let key_bytes = &clear[clear.len() - scheme.session_key_len..];
        let template = KeyTemplate::aes_session_key(self.config.session_key_id.clone(), key_bytes);
        let session_key = KeyGuard {
            guard: &store,
            handle: self
                .store
                .create_object(session, template)
                .map_err(crypto_failure("session key import failed"))?,
            armed: true,
        };
        drop(clear);

        self.store
            .decrypt_init(session, Mechanism::aes_cbc_zero_iv(), session_key.handle)
            .map_err(crypto_failure("cannot initialize content decryption"))?;

        shortcuts
            .activate(
                CommandId::Decrypt,
                Box::new(CbcShortcut {
                    store: self.store.clone(),
                    session,
                }),
            )
            .map_err(|e| {
                error!(error = %e, "cannot activate the decrypt shortcut");
                TeeError::Crypto
            })?;

        let session_key = session_key.disarm();
        debug!(store_session = session.0, key = session_key.0, "decrypt session opened");
        Ok(DecryptSession { store, session_key })
    }

    /// Install the device key.
    fn init(&self, session: &ManagementSession) -> Result<(), TeeError> {
        let template = self.device_key.template(self.config.device_key_id.clone());
        match self.store.create_object(session.store.session, template) {
            Ok(handle) => {
                debug!(handle = handle.0, "device key installed");
                Ok(())
            }
            Err(CryptokiError::AttributeValueInvalid) => {
                warn!("device key already initialized");
                Err(TeeError::AlreadyInitialized)
            }
            Err(e) => {
                error!(error = %e, "device key import failed");
                Err(TeeError::Crypto)
            }
        }
    }

    /// Destroy every object visible to the session, one at a time.
    fn clean(&self, session: &ManagementSession) -> Result<(), TeeError> {
        let s = session.store.session;
        let mut destroyed = 0usize;
        loop {
            let found = self
                .store
                .find_objects(s, &ObjectFilter::All, 1)
                .map_err(crypto_failure("object search failed"))?;
            let Some(handle) = found.first().copied() else {
                break;
            };
            self.store
                .destroy_object(s, handle)
                .map_err(crypto_failure("object destroy failed"))?;
            destroyed += 1;
        }
        debug!(destroyed, "key store cleaned");
        Ok(())
    }
}

impl TrustedService for DrmService {
    type Session = AgentSession;

    fn create(&self) -> Result<(), TeeError> {
        self.store.initialize().map_err(crypto_failure("key store initialization failed"))
    }

    fn destroy(&self) {
        if let Err(e) = self.store.finalize() {
            debug!(error = %e, "key store finalize failed");
        }
    }

    fn open_session(
        &self,
        client: &ClientIdentity,
        request: OpenRequest<'_>,
        shortcuts: &mut ShortcutRegistrar,
    ) -> Result<AgentSession, TeeError> {
        trace!(client = %client.client_id, login = ?client.login, "open session");
        for (name, value) in client.properties() {
            trace!(property = name, value, "client property");
        }

        match request {
            OpenRequest::Management => self.open_management().map(AgentSession::Management),
            OpenRequest::Decrypt { encrypted_key, .. } => self
                .open_decrypt(client, encrypted_key, shortcuts)
                .map(AgentSession::Decrypt),
        }
    }

    fn invoke_command(&self, session: &mut AgentSession, command: Command) -> Result<(), TeeError> {
        trace!(command = ?command.id(), kind = ?session.kind(), "invoke command");
        match (session, command) {
            (_, Command::Decrypt { .. }) => {
                error!("DECRYPT reached the agent: update shortcut is not active");
                Err(TeeError::BadState)
            }
            (AgentSession::Management(s), Command::Init) => self.init(s),
            (AgentSession::Management(s), Command::Clean) => self.clean(s),
            (AgentSession::Decrypt(_), command) => {
                error!(command = ?command.id(), "management command on a decrypt session");
                Err(TeeError::BadState)
            }
        }
    }

    /// # Panics
    ///
    /// Panics if the session key of a decrypt session cannot be destroyed.
    /// The key is created and owned by the session, so this only happens when
    /// the key store is corrupt.
    fn close_session(&self, session: AgentSession) {
        match session {
            AgentSession::Management(s) => {
                debug!(store_session = s.store.session.0, "management session closed");
            }
            AgentSession::Decrypt(s) => {
                let _ = self.store.decrypt_final(s.store.session);
                if let Err(e) = self.store.destroy_object(s.store.session, s.session_key) {
                    error!(error = %e, "cannot destroy the session key");
                    panic!("session key destroy failed: {e}");
                }
                debug!(store_session = s.store.session.0, "decrypt session closed");
            }
        }
    }
}
