//! License blob construction.
//!
//! A license carries one session key wrapped for a device. The agent reverses
//! this when a decrypt session is opened.

use rand_core::{OsRng, RngCore};
use tdrm_keystore::CryptokiError;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::{ConfigError, UnwrapScheme};
use crate::device_key::{DeviceKeyMaterial, DevicePublicKey};

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("session key must be {expected} bytes, got {actual}")]
    KeyLength { expected: usize, actual: usize },

    #[error("device modulus is {actual} bytes but the scheme expects {expected}")]
    SchemeMismatch { expected: usize, actual: usize },

    #[error("invalid unwrap scheme: {0}")]
    InvalidScheme(#[from] ConfigError),

    #[error("wrapping failed: {0}")]
    Wrap(#[from] CryptokiError),
}

/// Wraps session keys for one device.
#[derive(Debug, Clone)]
pub struct LicenseBuilder {
    device: DevicePublicKey,
    scheme: UnwrapScheme,
}

impl LicenseBuilder {
    pub fn new(device: DevicePublicKey, scheme: UnwrapScheme) -> Result<Self, LicenseError> {
        scheme.validate()?;
        if device.modulus_len() != scheme.modulus_len {
            return Err(LicenseError::SchemeMismatch {
                expected: scheme.modulus_len,
                actual: device.modulus_len(),
            });
        }
        Ok(LicenseBuilder { device, scheme })
    }

    /// Builder for the agent's compiled-in device key and default scheme.
    pub fn for_builtin_device() -> Self {
        LicenseBuilder {
            device: DeviceKeyMaterial::builtin().public_key(),
            scheme: UnwrapScheme::default(),
        }
    }

    pub fn scheme(&self) -> UnwrapScheme {
        self.scheme
    }

    /// Encrypted license blob for `session_key`.
    pub fn build(&self, session_key: &[u8]) -> Result<Vec<u8>, LicenseError> {
        if session_key.len() != self.scheme.session_key_len {
            return Err(LicenseError::KeyLength {
                expected: self.scheme.session_key_len,
                actual: session_key.len(),
            });
        }

        let mut block = Zeroizing::new(vec![0u8; self.scheme.modulus_len]);
        let padding_end = self.scheme.padding_len();
        // Byte 0 stays zero, which keeps the block below the modulus.
        OsRng.fill_bytes(&mut block[1..padding_end]);
        for byte in &mut block[1..padding_end] {
            if *byte == 0 {
                *byte = 0xFF;
            }
        }
        block[padding_end..].copy_from_slice(session_key);

        Ok(self.device.wrap(&block)?)
    }
}
