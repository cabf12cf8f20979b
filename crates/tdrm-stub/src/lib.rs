//! Client-side DRM stub.
//!
//! [`DrmStub`] is what a player links against. It keeps a table of open
//! sessions, validates caller input locally and forwards the rest to the DRM
//! agent over a [`TeeTransport`](tdrm_tee::TeeTransport).

#![forbid(unsafe_code)]

pub mod config;
pub mod registry;
pub mod stub;

#[cfg(test)]
mod proptests;

pub use config::{StubConfig, DECRYPT_RIGHT_PROPERTY};
pub use registry::{SessionEntry, SessionRegistry, DEFAULT_MAX_SESSIONS};
pub use stub::{DecryptSession, DrmStub};
