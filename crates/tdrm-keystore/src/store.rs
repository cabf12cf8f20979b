//! The key store: sessions, objects and decryption operations.
//!
//! A [`KeyStore`] is a handle; clones share the same objects and sessions.
//! Token objects optionally persist to a JSON file, rewritten after every
//! token create/destroy. Session objects live until their session closes.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use zeroize::Zeroizing;

use crate::error::CryptokiError;
use crate::mechanism::{rsa_x509_decrypt, CbcStream, Mechanism};
use crate::object::{KeyMaterial, KeyTemplate, KeyType, ObjectFilter, ObjectHandle, RsaKeyComponents};

const STORE_FORMAT_VERSION: u32 = 1;

/// Handle to a key store session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreSession(pub u32);

/// Options for [`KeyStore::open_session`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionFlags {
    /// Allow creating and destroying token objects.
    pub read_write: bool,
}

impl SessionFlags {
    pub const READ_ONLY: SessionFlags = SessionFlags { read_write: false };
    pub const READ_WRITE: SessionFlags = SessionFlags { read_write: true };
}

// ============================================================================
// Internal state
// ============================================================================

struct StoredObject {
    template: KeyTemplate,
    /// Owning session for session objects, `None` for token objects.
    owner: Option<StoreSession>,
}

enum Operation {
    Rsa(RsaKeyComponents),
    Cbc(CbcStream),
}

struct Session {
    flags: SessionFlags,
    logged_in: bool,
    operation: Option<Operation>,
}

#[derive(Default)]
struct Inner {
    initialized: bool,
    sessions: HashMap<StoreSession, Session>,
    objects: BTreeMap<ObjectHandle, StoredObject>,
    next_session: u32,
    next_object: u32,
    path: Option<PathBuf>,
}

#[derive(Deserialize)]
struct PersistedStore {
    version: u32,
    objects: Vec<KeyTemplate>,
}

#[derive(Serialize)]
struct PersistedStoreRef<'a> {
    version: u32,
    objects: Vec<&'a KeyTemplate>,
}

impl Inner {
    fn check_initialized(&self) -> Result<(), CryptokiError> {
        if self.initialized {
            Ok(())
        } else {
            Err(CryptokiError::NotInitialized)
        }
    }

    fn session(&self, session: StoreSession) -> Result<&Session, CryptokiError> {
        self.check_initialized()?;
        self.sessions
            .get(&session)
            .ok_or(CryptokiError::SessionHandleInvalid)
    }

    fn session_mut(&mut self, session: StoreSession) -> Result<&mut Session, CryptokiError> {
        self.check_initialized()?;
        self.sessions
            .get_mut(&session)
            .ok_or(CryptokiError::SessionHandleInvalid)
    }

    fn logged_in_session(&self, session: StoreSession) -> Result<&Session, CryptokiError> {
        let s = self.session(session)?;
        if !s.logged_in {
            return Err(CryptokiError::UserNotLoggedIn);
        }
        Ok(s)
    }

    fn visible_object(
        &self,
        session: StoreSession,
        handle: ObjectHandle,
    ) -> Result<&StoredObject, CryptokiError> {
        match self.objects.get(&handle) {
            Some(obj) if obj.owner.is_none() || obj.owner == Some(session) => Ok(obj),
            _ => Err(CryptokiError::ObjectHandleInvalid),
        }
    }

    fn allocate_object_handle(&mut self) -> ObjectHandle {
        self.next_object = self.next_object.wrapping_add(1).max(1);
        while self.objects.contains_key(&ObjectHandle(self.next_object)) {
            self.next_object = self.next_object.wrapping_add(1).max(1);
        }
        ObjectHandle(self.next_object)
    }

    fn persist(&self) -> Result<(), CryptokiError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = PersistedStoreRef {
            version: STORE_FORMAT_VERSION,
            objects: self
                .objects
                .values()
                .filter(|o| o.owner.is_none())
                .map(|o| &o.template)
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        trace!(path = %path.display(), objects = snapshot.objects.len(), "key store persisted");
        Ok(())
    }
}

// ============================================================================
// KeyStore
// ============================================================================

/// PKCS#11-style key store.
#[derive(Clone)]
pub struct KeyStore {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("KeyStore")
            .field("initialized", &inner.initialized)
            .field("sessions", &inner.sessions.len())
            .field("objects", &inner.objects.len())
            .field("path", &inner.path)
            .finish()
    }
}

impl KeyStore {
    /// A store whose token objects live only as long as the process.
    pub fn in_memory() -> Self {
        KeyStore {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// A store backed by `path`. A missing file is an empty store; the file
    /// is created on the first token-object change.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CryptokiError> {
        let path = path.as_ref().to_path_buf();
        let mut inner = Inner::default();

        if path.exists() {
            let bytes = fs::read(&path)?;
            let persisted: PersistedStore = serde_json::from_slice(&bytes)?;
            if persisted.version != STORE_FORMAT_VERSION {
                return Err(CryptokiError::Persistence(format!(
                    "unsupported key store version {}",
                    persisted.version
                )));
            }
            for template in persisted.objects {
                template.validate()?;
                let handle = inner.allocate_object_handle();
                inner.objects.insert(
                    handle,
                    StoredObject {
                        template: KeyTemplate { token: true, ..template },
                        owner: None,
                    },
                );
            }
            debug!(path = %path.display(), objects = inner.objects.len(), "key store loaded");
        } else if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        inner.path = Some(path);
        Ok(KeyStore {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<PathBuf> {
        self.inner.lock().path.clone()
    }

    pub fn initialize(&self) -> Result<(), CryptokiError> {
        let mut inner = self.inner.lock();
        if inner.initialized {
            return Err(CryptokiError::AlreadyInitialized);
        }
        inner.initialized = true;
        debug!("key store initialized");
        Ok(())
    }

    /// Close every session and stop accepting calls.
    pub fn finalize(&self) -> Result<(), CryptokiError> {
        let mut inner = self.inner.lock();
        inner.check_initialized()?;
        if !inner.sessions.is_empty() {
            warn!(sessions = inner.sessions.len(), "finalizing key store with open sessions");
        }
        inner.sessions.clear();
        inner.objects.retain(|_, o| o.owner.is_none());
        inner.initialized = false;
        debug!("key store finalized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().initialized
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    pub fn open_session(&self, flags: SessionFlags) -> Result<StoreSession, CryptokiError> {
        let mut inner = self.inner.lock();
        inner.check_initialized()?;

        inner.next_session = inner.next_session.wrapping_add(1).max(1);
        while inner.sessions.contains_key(&StoreSession(inner.next_session)) {
            inner.next_session = inner.next_session.wrapping_add(1).max(1);
        }
        let handle = StoreSession(inner.next_session);
        inner.sessions.insert(
            handle,
            Session {
                flags,
                logged_in: false,
                operation: None,
            },
        );
        trace!(session = handle.0, read_write = flags.read_write, "store session opened");
        Ok(handle)
    }

    /// Close a session, destroying its session objects and active operation.
    pub fn close_session(&self, session: StoreSession) -> Result<(), CryptokiError> {
        let mut inner = self.inner.lock();
        inner.check_initialized()?;
        inner
            .sessions
            .remove(&session)
            .ok_or(CryptokiError::SessionHandleInvalid)?;
        inner.objects.retain(|_, o| o.owner != Some(session));
        trace!(session = session.0, "store session closed");
        Ok(())
    }

    pub fn login(&self, session: StoreSession) -> Result<(), CryptokiError> {
        let mut inner = self.inner.lock();
        let s = inner.session_mut(session)?;
        if s.logged_in {
            return Err(CryptokiError::UserAlreadyLoggedIn);
        }
        s.logged_in = true;
        Ok(())
    }

    pub fn logout(&self, session: StoreSession) -> Result<(), CryptokiError> {
        let mut inner = self.inner.lock();
        let s = inner.session_mut(session)?;
        if !s.logged_in {
            return Err(CryptokiError::UserNotLoggedIn);
        }
        s.logged_in = false;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------------

    /// Create an object from `template`.
    ///
    /// A token object whose class and id match an existing token object is
    /// rejected with [`CryptokiError::AttributeValueInvalid`].
    pub fn create_object(
        &self,
        session: StoreSession,
        template: KeyTemplate,
    ) -> Result<ObjectHandle, CryptokiError> {
        let mut inner = self.inner.lock();
        let s = inner.logged_in_session(session)?;
        if template.token && !s.flags.read_write {
            return Err(CryptokiError::SessionReadOnly);
        }
        template.validate()?;

        if template.token
            && inner.objects.values().any(|o| {
                o.owner.is_none() && o.template.class == template.class && o.template.id == template.id
            })
        {
            debug!(id = %template.id, "token object already exists");
            return Err(CryptokiError::AttributeValueInvalid);
        }

        let token = template.token;
        let handle = inner.allocate_object_handle();
        debug!(handle = handle.0, id = %template.id, token, "creating object");
        inner.objects.insert(
            handle,
            StoredObject {
                template,
                owner: if token { None } else { Some(session) },
            },
        );

        if token {
            if let Err(e) = inner.persist() {
                inner.objects.remove(&handle);
                return Err(e);
            }
        }
        Ok(handle)
    }

    pub fn destroy_object(
        &self,
        session: StoreSession,
        handle: ObjectHandle,
    ) -> Result<(), CryptokiError> {
        let mut inner = self.inner.lock();
        let s = inner.logged_in_session(session)?;
        let read_write = s.flags.read_write;
        let token = inner.visible_object(session, handle)?.owner.is_none();
        if token && !read_write {
            return Err(CryptokiError::SessionReadOnly);
        }

        let removed = inner
            .objects
            .remove(&handle)
            .ok_or(CryptokiError::ObjectHandleInvalid)?;
        if token {
            if let Err(e) = inner.persist() {
                inner.objects.insert(handle, removed);
                return Err(e);
            }
        }
        debug!(handle = handle.0, token, "object destroyed");
        Ok(())
    }

    /// Up to `max` objects visible to `session` that match `filter`, in
    /// handle order.
    pub fn find_objects(
        &self,
        session: StoreSession,
        filter: &ObjectFilter,
        max: usize,
    ) -> Result<Vec<ObjectHandle>, CryptokiError> {
        let inner = self.inner.lock();
        inner.logged_in_session(session)?;
        Ok(inner
            .objects
            .iter()
            .filter(|(_, o)| o.owner.is_none() || o.owner == Some(session))
            .filter(|(_, o)| filter.matches(&o.template))
            .map(|(h, _)| *h)
            .take(max)
            .collect())
    }

    /// Total number of objects, across all sessions.
    pub fn object_count(&self) -> usize {
        self.inner.lock().objects.len()
    }

    // ------------------------------------------------------------------------
    // Decryption
    // ------------------------------------------------------------------------

    pub fn decrypt_init(
        &self,
        session: StoreSession,
        mechanism: Mechanism,
        key: ObjectHandle,
    ) -> Result<(), CryptokiError> {
        let mut inner = self.inner.lock();
        let s = inner.logged_in_session(session)?;
        if s.operation.is_some() {
            return Err(CryptokiError::OperationActive);
        }

        let object = &inner.visible_object(session, key)?.template;
        if !object.decrypt {
            return Err(CryptokiError::KeyFunctionNotPermitted);
        }
        let operation = match (mechanism, object.key_type, &object.material) {
            (Mechanism::RsaX509, KeyType::Rsa, KeyMaterial::Rsa(rsa)) => Operation::Rsa(rsa.clone()),
            (Mechanism::AesCbc { iv }, KeyType::Aes, KeyMaterial::Secret(value)) => {
                Operation::Cbc(CbcStream::new(value.expose(), iv))
            }
            _ => return Err(CryptokiError::KeyTypeInconsistent),
        };

        inner.session_mut(session)?.operation = Some(operation);
        trace!(session = session.0, key = key.0, ?mechanism, "decrypt initialized");
        Ok(())
    }

    /// Single-part decryption. Ends the active operation, whatever the outcome.
    pub fn decrypt(
        &self,
        session: StoreSession,
        data: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptokiError> {
        let mut inner = self.inner.lock();
        inner.logged_in_session(session)?;
        let operation = inner
            .session_mut(session)?
            .operation
            .take()
            .ok_or(CryptokiError::OperationNotInitialized)?;

        match operation {
            Operation::Rsa(key) => rsa_x509_decrypt(&key, data),
            Operation::Cbc(mut stream) => {
                let mut out = Zeroizing::new(data.to_vec());
                stream.update(&mut out)?;
                Ok(out)
            }
        }
    }

    /// Decrypt the next chunk of a multi-part operation in place.
    pub fn decrypt_update(&self, session: StoreSession, data: &mut [u8]) -> Result<(), CryptokiError> {
        let mut inner = self.inner.lock();
        inner.logged_in_session(session)?;
        match inner.session_mut(session)?.operation.as_mut() {
            Some(Operation::Cbc(stream)) => stream.update(data),
            Some(Operation::Rsa(_)) => Err(CryptokiError::MechanismInvalid),
            None => Err(CryptokiError::OperationNotInitialized),
        }
    }

    /// End a multi-part operation.
    pub fn decrypt_final(&self, session: StoreSession) -> Result<(), CryptokiError> {
        let mut inner = self.inner.lock();
        inner
            .session_mut(session)?
            .operation
            .take()
            .map(|_| ())
            .ok_or(CryptokiError::OperationNotInitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectId;
    use crate::testing::rsa_1024;

    fn ready_store() -> (KeyStore, StoreSession) {
        let store = KeyStore::in_memory();
        store.initialize().unwrap();
        let session = store.open_session(SessionFlags::READ_WRITE).unwrap();
        store.login(session).unwrap();
        (store, session)
    }

    fn device_key() -> KeyTemplate {
        KeyTemplate::rsa_token_key(ObjectId::new(&[0x00, 0x01]), rsa_1024())
    }

    #[test]
    fn test_not_initialized() {
        let store = KeyStore::in_memory();
        assert_eq!(
            store.open_session(SessionFlags::READ_ONLY),
            Err(CryptokiError::NotInitialized)
        );
        store.initialize().unwrap();
        assert_eq!(store.initialize(), Err(CryptokiError::AlreadyInitialized));
    }

    #[test]
    fn test_login_required() {
        let store = KeyStore::in_memory();
        store.initialize().unwrap();
        let session = store.open_session(SessionFlags::READ_WRITE).unwrap();
        assert_eq!(
            store.find_objects(session, &ObjectFilter::All, 1),
            Err(CryptokiError::UserNotLoggedIn)
        );
        store.login(session).unwrap();
        assert_eq!(store.login(session), Err(CryptokiError::UserAlreadyLoggedIn));
        store.logout(session).unwrap();
        assert_eq!(store.logout(session), Err(CryptokiError::UserNotLoggedIn));
    }

    #[test]
    fn test_duplicate_token_object_rejected() {
        let (store, session) = ready_store();
        store.create_object(session, device_key()).unwrap();
        assert_eq!(
            store.create_object(session, device_key()),
            Err(CryptokiError::AttributeValueInvalid)
        );
        assert_eq!(store.object_count(), 1);
    }

    #[test]
    fn test_read_only_session_cannot_create_token() {
        let store = KeyStore::in_memory();
        store.initialize().unwrap();
        let session = store.open_session(SessionFlags::READ_ONLY).unwrap();
        store.login(session).unwrap();
        assert_eq!(
            store.create_object(session, device_key()),
            Err(CryptokiError::SessionReadOnly)
        );
        // Session objects are fine
        let aes = KeyTemplate::aes_session_key(ObjectId::new(&[0x00, 0x02]), &[7u8; 16]);
        assert!(store.create_object(session, aes).is_ok());
    }

    #[test]
    fn test_session_objects_are_private_and_dropped_on_close() {
        let (store, owner) = ready_store();
        let other = store.open_session(SessionFlags::READ_ONLY).unwrap();
        store.login(other).unwrap();

        let aes = KeyTemplate::aes_session_key(ObjectId::new(&[0x00, 0x02]), &[7u8; 16]);
        let handle = store.create_object(owner, aes).unwrap();

        assert_eq!(store.find_objects(owner, &ObjectFilter::All, 10).unwrap(), vec![handle]);
        assert!(store.find_objects(other, &ObjectFilter::All, 10).unwrap().is_empty());
        assert_eq!(
            store.destroy_object(other, handle),
            Err(CryptokiError::ObjectHandleInvalid)
        );

        store.close_session(owner).unwrap();
        assert_eq!(store.object_count(), 0);
    }

    #[test]
    fn test_find_by_id_and_max() {
        let (store, session) = ready_store();
        let dev = store.create_object(session, device_key()).unwrap();
        store
            .create_object(
                session,
                KeyTemplate::aes_session_key(ObjectId::new(&[0x00, 0x02]), &[1u8; 16]),
            )
            .unwrap();

        let found = store
            .find_objects(session, &ObjectFilter::Id(ObjectId::new(&[0x00, 0x01])), 1)
            .unwrap();
        assert_eq!(found, vec![dev]);
        assert_eq!(store.find_objects(session, &ObjectFilter::All, 1).unwrap().len(), 1);
        assert_eq!(store.find_objects(session, &ObjectFilter::All, 5).unwrap().len(), 2);
    }

    #[test]
    fn test_decrypt_init_checks() {
        let (store, session) = ready_store();
        let mut template = KeyTemplate::aes_session_key(ObjectId::new(&[9]), &[3u8; 16]);
        template.decrypt = false;
        let no_decrypt = store.create_object(session, template).unwrap();
        assert_eq!(
            store.decrypt_init(session, Mechanism::aes_cbc_zero_iv(), no_decrypt),
            Err(CryptokiError::KeyFunctionNotPermitted)
        );

        let dev = store.create_object(session, device_key()).unwrap();
        assert_eq!(
            store.decrypt_init(session, Mechanism::aes_cbc_zero_iv(), dev),
            Err(CryptokiError::KeyTypeInconsistent)
        );

        store.decrypt_init(session, Mechanism::RsaX509, dev).unwrap();
        assert_eq!(
            store.decrypt_init(session, Mechanism::RsaX509, dev),
            Err(CryptokiError::OperationActive)
        );
        assert_eq!(
            store.decrypt_update(session, &mut [0u8; 16]),
            Err(CryptokiError::MechanismInvalid)
        );
        store.decrypt_final(session).unwrap();
        assert_eq!(
            store.decrypt_final(session),
            Err(CryptokiError::OperationNotInitialized)
        );
    }

    #[test]
    fn test_rsa_single_part_ends_operation() {
        let (store, session) = ready_store();
        let dev = store.create_object(session, device_key()).unwrap();
        let key = rsa_1024();

        let mut block = vec![0u8; 128];
        block[112..].copy_from_slice(&[0x5Au8; 16]);
        let wrapped =
            crate::mechanism::rsa_x509_encrypt(&key.modulus, &key.public_exponent, &block).unwrap();

        store.decrypt_init(session, Mechanism::RsaX509, dev).unwrap();
        let clear = store.decrypt(session, &wrapped).unwrap();
        assert_eq!(clear.as_slice(), block.as_slice());
        assert_eq!(
            store.decrypt(session, &wrapped),
            Err(CryptokiError::OperationNotInitialized)
        );
    }

    #[test]
    fn test_operation_survives_key_destroy() {
        let (store, session) = ready_store();
        let aes = store
            .create_object(
                session,
                KeyTemplate::aes_session_key(ObjectId::new(&[0x00, 0x02]), &[4u8; 16]),
            )
            .unwrap();
        store.decrypt_init(session, Mechanism::aes_cbc_zero_iv(), aes).unwrap();
        store.destroy_object(session, aes).unwrap();
        assert!(store.decrypt_update(session, &mut [0u8; 32]).is_ok());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store").join("keystore.json");

        {
            let store = KeyStore::open(&path).unwrap();
            store.initialize().unwrap();
            let session = store.open_session(SessionFlags::READ_WRITE).unwrap();
            store.login(session).unwrap();
            store.create_object(session, device_key()).unwrap();
            store
                .create_object(
                    session,
                    KeyTemplate::aes_session_key(ObjectId::new(&[0x00, 0x02]), &[1u8; 16]),
                )
                .unwrap();
        }
        assert!(path.exists());

        let reopened = KeyStore::open(&path).unwrap();
        // Only the token object was persisted
        assert_eq!(reopened.object_count(), 1);
        reopened.initialize().unwrap();
        let session = reopened.open_session(SessionFlags::READ_WRITE).unwrap();
        reopened.login(session).unwrap();
        assert_eq!(
            reopened.create_object(session, device_key()),
            Err(CryptokiError::AttributeValueInvalid)
        );

        let handles = reopened.find_objects(session, &ObjectFilter::All, 10).unwrap();
        reopened.destroy_object(session, handles[0]).unwrap();
        assert_eq!(KeyStore::open(&path).unwrap().object_count(), 0);
    }

    #[test]
    fn test_persisted_file_is_hex_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keystore.json");
        let store = KeyStore::open(&path).unwrap();
        store.initialize().unwrap();
        let session = store.open_session(SessionFlags::READ_WRITE).unwrap();
        store.login(session).unwrap();
        store.create_object(session, device_key()).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        let object = &json["objects"][0];
        assert_eq!(object["id"], "0001");
        assert_eq!(object["class"], "private_key");
        assert_eq!(object["material"]["kind"], "rsa");
        assert_eq!(object["material"]["value"]["public_exponent"], "010001");
    }

    #[test]
    fn test_finalize_closes_sessions() {
        let (store, session) = ready_store();
        store
            .create_object(
                session,
                KeyTemplate::aes_session_key(ObjectId::new(&[0x00, 0x02]), &[1u8; 16]),
            )
            .unwrap();
        store.finalize().unwrap();
        assert_eq!(store.object_count(), 0);
        store.initialize().unwrap();
        assert_eq!(store.login(session), Err(CryptokiError::SessionHandleInvalid));
    }
}
