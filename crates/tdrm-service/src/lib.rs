//! DRM agent trusted service.
//!
//! [`DrmService`] runs in the secure world behind a
//! [`TrustedService`](tdrm_tee::TrustedService) host. It owns the device
//! root key lifecycle (`INIT`, `CLEAN`) and turns license blobs into AES
//! session keys whose decryption is served by an update shortcut.

#![forbid(unsafe_code)]

pub mod agent;
pub mod config;
pub mod device_key;
pub mod license;

#[cfg(test)]
mod proptests;

pub use agent::{AgentSession, DrmService};
pub use config::{
    ConfigError, ServiceConfig, UnwrapScheme, DEFAULT_DECRYPT_RIGHT_PROPERTY, DEVICE_KEY_ID,
    SESSION_KEY_ID,
};
pub use device_key::{DeviceKeyMaterial, DevicePublicKey};
pub use license::{LicenseBuilder, LicenseError};
