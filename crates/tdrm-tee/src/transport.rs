//! The client side of the boundary.

use std::fmt;

use tdrm_proto::{Command, LoginMethod, OpenRequest, TeeError};
use uuid::Uuid;

use crate::memory::{SharedBuffer, SharedMemory};

/// Secure-world session identifier, as handed out by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TeeSessionId(pub u32);

impl fmt::Display for TeeSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tee:{}", self.0)
    }
}

/// Blocking request/response channel into the secure world.
///
/// Every call except `initialize_context` requires a live context.
pub trait TeeTransport: Send + Sync {
    fn initialize_context(&self) -> Result<(), TeeError>;

    fn finalize_context(&self) -> Result<(), TeeError>;

    fn open_session(
        &self,
        service: &Uuid,
        login: LoginMethod,
        request: OpenRequest<'_>,
    ) -> Result<TeeSessionId, TeeError>;

    fn invoke_command(&self, session: TeeSessionId, command: Command) -> Result<(), TeeError>;

    fn close_session(&self, session: TeeSessionId) -> Result<(), TeeError>;

    /// Allocate `len` zeroed bytes visible to the secure world.
    fn allocate_shared_memory(&self, len: usize) -> Result<SharedMemory, TeeError>;

    /// Make caller memory visible to the secure world. A buffer can be
    /// registered only once at a time.
    fn register_shared_memory(&self, buffer: &SharedBuffer) -> Result<SharedMemory, TeeError>;

    fn release_shared_memory(&self, memory: &SharedMemory) -> Result<(), TeeError>;
}
