//! Secure-world boundary for the TDRM agent.
//!
//! The untrusted side talks to the secure world through [`TeeTransport`];
//! services running inside it implement [`TrustedService`]. [`LocalTee`]
//! connects the two in-process.

#![forbid(unsafe_code)]

pub mod identity;
pub mod local;
pub mod memory;
pub mod service;
pub mod transport;

#[cfg(test)]
mod proptests;

use uuid::Uuid;

pub use identity::{ClientIdentity, ClientManifest, ManifestError, PROP_CLIENT_LOGIN};
pub use local::{LocalTee, LocalTeeConfig, TeeStats, TeeStatsSnapshot, DEFAULT_MAX_SHARED_MEMORY};
pub use memory::{SharedBuffer, SharedMemory};
pub use service::{ShortcutPolicy, ShortcutRegistrar, TrustedService, UpdateShortcut};
pub use transport::{TeeSessionId, TeeTransport};

/// Service identity of the DRM agent.
pub const DRM_AGENT_UUID: Uuid = Uuid::from_u128(0x56304b83_5c4e_4428_b99e_605c96ae58d6);

/// Service identity of the alternate ("stiplet") DRM agent.
pub const DRM_STIPLET_UUID: Uuid = Uuid::from_u128(0x56304b83_5c4e_4428_b99e_605c96ae58d7);
