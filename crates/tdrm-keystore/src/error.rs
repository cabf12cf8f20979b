//! Key store error types.

use thiserror::Error;

/// Result of a failed key store call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptokiError {
    #[error("key store not initialized")]
    NotInitialized,

    #[error("key store already initialized")]
    AlreadyInitialized,

    #[error("invalid session handle")]
    SessionHandleInvalid,

    #[error("session is read-only")]
    SessionReadOnly,

    #[error("user not logged in")]
    UserNotLoggedIn,

    #[error("user already logged in")]
    UserAlreadyLoggedIn,

    #[error("invalid object handle")]
    ObjectHandleInvalid,

    /// Returned when a token object with the same class and id already exists.
    #[error("attribute value invalid")]
    AttributeValueInvalid,

    #[error("template inconsistent: {0}")]
    TemplateInconsistent(String),

    #[error("key size out of range: {0} bytes")]
    KeySizeRange(usize),

    #[error("key type inconsistent with mechanism")]
    KeyTypeInconsistent,

    #[error("key function not permitted")]
    KeyFunctionNotPermitted,

    #[error("mechanism invalid for this call")]
    MechanismInvalid,

    #[error("an operation is already active on this session")]
    OperationActive,

    #[error("no operation initialized on this session")]
    OperationNotInitialized,

    #[error("encrypted data length out of range: {0} bytes")]
    EncryptedDataLenRange(usize),

    #[error("data length out of range: {0} bytes")]
    DataLenRange(usize),

    #[error("encrypted data invalid")]
    EncryptedDataInvalid,

    #[error("device error: {0}")]
    DeviceError(String),

    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl From<std::io::Error> for CryptokiError {
    fn from(e: std::io::Error) -> Self {
        CryptokiError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for CryptokiError {
    fn from(e: serde_json::Error) -> Self {
        CryptokiError::Persistence(e.to_string())
    }
}
