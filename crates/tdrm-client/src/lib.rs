//! TDRM client - command-line front end of the DRM stub
//!
//! This crate provides:
//! - Device root key installation and key store cleanup
//! - Block-wise decryption of content files with a license
//! - TOML configuration with command-line overrides

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod content;
pub mod environment;

#[cfg(test)]
mod proptests;

pub use cli::Cli;
pub use config::{CliOverrides, Config, ConfigError};
pub use content::{decrypt_stream, ContentError};
pub use environment::AgentEnvironment;

use tdrm_proto::DrmError;

/// Process exit status for a DRM status code.
///
/// `0` is success; DRM error codes are passed through unchanged.
pub fn exit_code(status: u32) -> std::process::ExitCode {
    std::process::ExitCode::from(exit_status(status))
}

/// Statuses that do not fit a process exit status become `GENERIC`.
fn exit_status(status: u32) -> u8 {
    u8::try_from(status).unwrap_or(DrmError::Generic.code() as u8)
}
