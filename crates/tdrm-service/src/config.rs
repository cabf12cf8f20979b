//! Agent configuration.

use tdrm_keystore::ObjectId;
use thiserror::Error;

/// Property a client must carry, set to true, to open decrypt sessions.
pub const DEFAULT_DECRYPT_RIGHT_PROPERTY: &str = "example_drm.allow_decrypt_content";

/// Key-store id of the device root key.
pub const DEVICE_KEY_ID: [u8; 2] = [0x00, 0x01];

/// Key-store id given to unwrapped session keys.
pub const SESSION_KEY_ID: [u8; 2] = [0x00, 0x02];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("validation error: {0}")]
    ValidationError(String),
}

/// How a session key travels inside a license blob.
///
/// The blob is one raw RSA block of `modulus_len` bytes. After decryption the
/// last `session_key_len` bytes are the AES key; everything before is padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwrapScheme {
    pub modulus_len: usize,
    pub session_key_len: usize,
}

impl Default for UnwrapScheme {
    fn default() -> Self {
        UnwrapScheme {
            modulus_len: 128,
            session_key_len: 16,
        }
    }
}

impl UnwrapScheme {
    /// Bytes of padding in front of the key.
    pub fn padding_len(&self) -> usize {
        self.modulus_len.saturating_sub(self.session_key_len)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.session_key_len, 16 | 24 | 32) {
            return Err(ConfigError::ValidationError(format!(
                "session_key_len must be 16, 24 or 32, got {}",
                self.session_key_len
            )));
        }
        // One byte at the front stays zero so the block is below the modulus.
        if self.modulus_len <= self.session_key_len + 1 {
            return Err(ConfigError::ValidationError(
                "modulus_len must exceed session_key_len plus one".to_string(),
            ));
        }
        Ok(())
    }
}

/// DRM agent settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub unwrap: UnwrapScheme,
    pub device_key_id: ObjectId,
    pub session_key_id: ObjectId,
    pub decrypt_right_property: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            unwrap: UnwrapScheme::default(),
            device_key_id: ObjectId::new(&DEVICE_KEY_ID),
            session_key_id: ObjectId::new(&SESSION_KEY_ID),
            decrypt_right_property: DEFAULT_DECRYPT_RIGHT_PROPERTY.to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.unwrap.validate()?;
        if self.device_key_id == self.session_key_id {
            return Err(ConfigError::ValidationError(
                "device and session key ids must differ".to_string(),
            ));
        }
        if self.decrypt_right_property.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "decrypt_right_property cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
