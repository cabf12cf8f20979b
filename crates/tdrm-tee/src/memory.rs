//! Shared memory exchanged between a client and the secure world.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tdrm_proto::{SharedMemoryId, TeeError};

/// Caller-visible bytes that the secure world can read and write.
///
/// Clones refer to the same bytes.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// A zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0u8; len])
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        SharedBuffer(Arc::new(Mutex::new(bytes)))
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Exclusive access to the bytes.
    pub fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.0.lock()
    }

    /// Copy `data` into the buffer at `offset`.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<(), TeeError> {
        let mut bytes = self.0.lock();
        let end = offset.checked_add(data.len()).ok_or(TeeError::BadParameters)?;
        let target = bytes.get_mut(offset..end).ok_or(TeeError::BadParameters)?;
        target.copy_from_slice(data);
        Ok(())
    }

    /// Copy `len` bytes out of the buffer starting at `offset`.
    pub fn read_at(&self, offset: usize, len: usize) -> Result<Vec<u8>, TeeError> {
        let bytes = self.0.lock();
        let end = offset.checked_add(len).ok_or(TeeError::BadParameters)?;
        bytes
            .get(offset..end)
            .map(<[u8]>::to_vec)
            .ok_or(TeeError::BadParameters)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    /// True when both values refer to the same bytes.
    pub fn same_as(&self, other: &SharedBuffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedBuffer({} bytes)", self.len())
    }
}

/// A buffer the secure world knows about, either allocated by the transport
/// or registered from caller memory.
#[derive(Debug, Clone)]
pub struct SharedMemory {
    pub id: SharedMemoryId,
    pub len: usize,
    /// Allocated by the transport rather than registered from the caller.
    pub owned: bool,
    pub buffer: SharedBuffer,
}
