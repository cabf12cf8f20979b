#![forbid(unsafe_code)]

//! TDRM protocol vocabulary.
//!
//! Types exchanged between the untrusted DRM stub and the DRM agent running
//! in the secure world:
//! - DRM error codes and the transport status taxonomy, plus the mapping
//!   between them
//! - Session kinds, login methods and session handles
//! - Session-open requests and agent commands

pub mod command;
pub mod error;
pub mod handle;

#[cfg(test)]
mod proptests;

pub use command::{Command, CommandId, LoginMethod, MemRegion, OpenRequest, SessionKind, SharedMemoryId};
pub use error::{status_code, translate_status, DrmError, TeeError, DRM_SUCCESS};
pub use handle::SessionHandle;

/// Granularity of decrypt operations, in bytes.
///
/// Every decrypt length must be a multiple of this value and every decrypt
/// buffer must be at least this large.
pub const BLOCK_SIZE: usize = 16;
