//! Session handles handed out by the DRM stub.

use std::fmt;

/// Opaque handle to an open DRM session.
///
/// The value `0` is reserved for [`SessionHandle::INVALID`]; every failed
/// open reports it and closing a session invalidates its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SessionHandle(pub u32);

impl SessionHandle {
    /// Sentinel for "no session".
    pub const INVALID: SessionHandle = SessionHandle(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl From<u32> for SessionHandle {
    fn from(raw: u32) -> Self {
        SessionHandle(raw)
    }
}
