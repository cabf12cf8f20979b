//! Session-open requests and agent commands.
//!
//! Each request variant carries its own typed payload, so the agent validates
//! a call with one exhaustive match instead of decoding packed parameter-type
//! descriptors.

use crate::error::TeeError;

/// Kind of a DRM agent session, fixed when the session is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// Root-key lifecycle session (`INIT`, `CLEAN`).
    Management,
    /// Content decryption session holding an installed session key.
    Decrypt,
}

impl SessionKind {
    pub const MANAGEMENT_TAG: u32 = 0x0000_0001;
    pub const DECRYPT_TAG: u32 = 0x0000_0002;

    /// Session tag sent with the open request.
    pub fn tag(self) -> u32 {
        match self {
            SessionKind::Management => Self::MANAGEMENT_TAG,
            SessionKind::Decrypt => Self::DECRYPT_TAG,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            Self::MANAGEMENT_TAG => Some(SessionKind::Management),
            Self::DECRYPT_TAG => Some(SessionKind::Decrypt),
            _ => None,
        }
    }

    /// Login method the stub uses when opening a session of this kind.
    pub fn login_method(self) -> LoginMethod {
        match self {
            SessionKind::Management => LoginMethod::Application,
            SessionKind::Decrypt => LoginMethod::Authentication,
        }
    }
}

/// How the client identifies itself to the secure world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginMethod {
    Public,
    User,
    Application,
    /// Client presents a signed manifest describing its properties.
    Authentication,
}

impl LoginMethod {
    /// Value of the `sm.client.login` property.
    pub fn as_u32(self) -> u32 {
        match self {
            LoginMethod::Public => 0x0000_0000,
            LoginMethod::User => 0x0000_0001,
            LoginMethod::Application => 0x0000_0004,
            LoginMethod::Authentication => 0x8000_0000,
        }
    }
}

/// Payload of a session-open call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenRequest<'a> {
    Management,
    Decrypt {
        /// Session key wrapped with the device public key.
        encrypted_key: &'a [u8],
        /// Client manifest, read by the stub from local storage.
        signature: &'a [u8],
    },
}

impl OpenRequest<'_> {
    pub fn kind(&self) -> SessionKind {
        match self {
            OpenRequest::Management => SessionKind::Management,
            OpenRequest::Decrypt { .. } => SessionKind::Decrypt,
        }
    }
}

/// Identifier of a shared memory block known to the secure world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SharedMemoryId(pub u32);

/// A byte range inside a shared memory block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemRegion {
    pub memory: SharedMemoryId,
    pub offset: usize,
    pub length: usize,
}

impl MemRegion {
    /// End offset, or `BadParameters` if it overflows.
    pub fn end(&self) -> Result<usize, TeeError> {
        self.offset.checked_add(self.length).ok_or(TeeError::BadParameters)
    }
}

/// Numeric command identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    Decrypt,
    Init,
    Clean,
}

impl CommandId {
    pub fn as_u32(self) -> u32 {
        match self {
            CommandId::Decrypt => 0x0000_0001,
            CommandId::Init => 0x0000_0002,
            CommandId::Clean => 0x0000_0003,
        }
    }
}

/// Command invoked on an open agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Install the device root key.
    Init,
    /// Erase every object from the agent key store.
    Clean,
    /// Decrypt `input` into `output`. The stub always passes the same region
    /// twice, so decryption happens in place.
    Decrypt { input: MemRegion, output: MemRegion },
}

impl Command {
    pub fn id(&self) -> CommandId {
        match self {
            Command::Init => CommandId::Init,
            Command::Clean => CommandId::Clean,
            Command::Decrypt { .. } => CommandId::Decrypt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_tags() {
        assert_eq!(SessionKind::from_tag(SessionKind::Management.tag()), Some(SessionKind::Management));
        assert_eq!(SessionKind::from_tag(SessionKind::Decrypt.tag()), Some(SessionKind::Decrypt));
        assert_eq!(SessionKind::Management.tag(), 1);
        assert_eq!(SessionKind::Decrypt.tag(), 2);
        for unknown in [0, 3, 0x99, u32::MAX] {
            assert_eq!(SessionKind::from_tag(unknown), None);
        }
    }

    #[test]
    fn test_login_per_kind() {
        assert_eq!(SessionKind::Management.login_method(), LoginMethod::Application);
        assert_eq!(SessionKind::Decrypt.login_method(), LoginMethod::Authentication);
    }

    #[test]
    fn test_region_end_overflow() {
        let region = MemRegion {
            memory: SharedMemoryId(1),
            offset: usize::MAX,
            length: 16,
        };
        assert_eq!(region.end(), Err(TeeError::BadParameters));

        let region = MemRegion {
            memory: SharedMemoryId(1),
            offset: 16,
            length: 32,
        };
        assert_eq!(region.end(), Ok(48));
    }

    #[test]
    fn test_command_ids() {
        let region = MemRegion {
            memory: SharedMemoryId(1),
            offset: 0,
            length: 16,
        };
        let decrypt = Command::Decrypt {
            input: region,
            output: region,
        };
        assert_eq!(decrypt.id(), CommandId::Decrypt);
        assert_eq!(Command::Init.id(), CommandId::Init);
        assert_eq!(Command::Clean.id(), CommandId::Clean);

        assert_eq!(decrypt.id().as_u32(), 1);
        assert_eq!(Command::Init.id().as_u32(), 2);
        assert_eq!(Command::Clean.id().as_u32(), 3);
    }
}
