//! Error types for the DRM protocol.
//!
//! Two taxonomies live here: [`TeeError`], the status a secure-world call
//! returns, and [`DrmError`], the closed set of codes the DRM stub reports to
//! its callers. Conversion from the former to the latter is total.

use thiserror::Error;

// ============================================================================
// DRM error codes
// ============================================================================

/// Numeric code reported for a successful operation.
pub const DRM_SUCCESS: u32 = 0;

/// Errors reported by the DRM stub.
///
/// Success is not a variant: operations return `Ok(..)` and the numeric
/// [`DRM_SUCCESS`] code is recovered with [`status_code`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DrmError {
    #[error("out of memory")]
    OutOfMemory = 0x01,

    #[error("DRM stub already initialized")]
    AlreadyInitialized = 0x02,

    #[error("DRM stub not initialized")]
    NotInitialized = 0x03,

    #[error("illegal argument")]
    IllegalArgument = 0x04,

    #[error("generic error")]
    Generic = 0x05,

    #[error("session not open")]
    SessionNotOpen = 0x06,

    #[error("session already open")]
    SessionAlreadyOpen = 0x07,

    #[error("cryptographic operation failed")]
    Crypto = 0x08,

    #[error("device key already initialized")]
    KeyAlreadyInitialized = 0x09,

    #[error("illegal state")]
    IllegalState = 0x0A,
}

impl DrmError {
    /// All error variants, in code order.
    pub const ALL: [DrmError; 10] = [
        DrmError::OutOfMemory,
        DrmError::AlreadyInitialized,
        DrmError::NotInitialized,
        DrmError::IllegalArgument,
        DrmError::Generic,
        DrmError::SessionNotOpen,
        DrmError::SessionAlreadyOpen,
        DrmError::Crypto,
        DrmError::KeyAlreadyInitialized,
        DrmError::IllegalState,
    ];

    /// Stable numeric code of this error.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Look up an error by its numeric code.
    ///
    /// Returns `None` for [`DRM_SUCCESS`] and for codes outside the taxonomy.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.code() == code)
    }

    /// Symbolic name of the error code.
    pub fn name(self) -> &'static str {
        match self {
            DrmError::OutOfMemory => "DRM_ERROR_OUT_OF_MEMORY",
            DrmError::AlreadyInitialized => "DRM_ERROR_ALREADY_INITIALIZED",
            DrmError::NotInitialized => "DRM_ERROR_NOT_INITIALIZED",
            DrmError::IllegalArgument => "DRM_ERROR_ILLEGAL_ARGUMENT",
            DrmError::Generic => "DRM_ERROR_GENERIC",
            DrmError::SessionNotOpen => "DRM_ERROR_SESSION_NOT_OPEN",
            DrmError::SessionAlreadyOpen => "DRM_ERROR_SESSION_ALREADY_OPEN",
            DrmError::Crypto => "DRM_ERROR_CRYPTO",
            DrmError::KeyAlreadyInitialized => "DRM_ERROR_KEY_ALREADY_INITIALIZED",
            DrmError::IllegalState => "DRM_ERROR_ILLEGAL_STATE",
        }
    }
}

/// Numeric DRM code of an operation result (`0` on success).
pub fn status_code<T>(result: &Result<T, DrmError>) -> u32 {
    match result {
        Ok(_) => DRM_SUCCESS,
        Err(e) => e.code(),
    }
}

// ============================================================================
// Secure-world status codes
// ============================================================================

/// Status returned by a secure-world call.
///
/// The generic codes follow the TEE client numbering; `Crypto` and
/// `AlreadyInitialized` are defined by the DRM agent itself.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeeError {
    #[error("generic secure-world error")]
    Generic,

    #[error("access denied")]
    AccessDenied,

    #[error("bad parameters")]
    BadParameters,

    #[error("bad state")]
    BadState,

    #[error("item not found")]
    ItemNotFound,

    #[error("out of memory")]
    OutOfMemory,

    #[error("communication with the secure world failed")]
    Communication,

    #[error("agent crypto failure")]
    Crypto,

    #[error("agent key already initialized")]
    AlreadyInitialized,

    #[error("unrecognized secure-world status 0x{0:08x}")]
    Other(u32),
}

impl TeeError {
    pub const GENERIC: u32 = 0xFFFF_0000;
    pub const ACCESS_DENIED: u32 = 0xFFFF_0001;
    pub const BAD_PARAMETERS: u32 = 0xFFFF_0006;
    pub const BAD_STATE: u32 = 0xFFFF_0007;
    pub const ITEM_NOT_FOUND: u32 = 0xFFFF_0008;
    pub const OUT_OF_MEMORY: u32 = 0xFFFF_000C;
    pub const COMMUNICATION: u32 = 0xFFFF_000E;
    pub const AGENT_CRYPTO: u32 = 0xF000_0001;
    pub const AGENT_ALREADY_INITIALIZED: u32 = 0xF000_0002;

    /// Raw status code.
    pub fn code(self) -> u32 {
        match self {
            TeeError::Generic => Self::GENERIC,
            TeeError::AccessDenied => Self::ACCESS_DENIED,
            TeeError::BadParameters => Self::BAD_PARAMETERS,
            TeeError::BadState => Self::BAD_STATE,
            TeeError::ItemNotFound => Self::ITEM_NOT_FOUND,
            TeeError::OutOfMemory => Self::OUT_OF_MEMORY,
            TeeError::Communication => Self::COMMUNICATION,
            TeeError::Crypto => Self::AGENT_CRYPTO,
            TeeError::AlreadyInitialized => Self::AGENT_ALREADY_INITIALIZED,
            TeeError::Other(code) => code,
        }
    }

    /// Decode a raw non-success status. Unknown codes become [`TeeError::Other`].
    pub fn from_code(code: u32) -> Self {
        match code {
            Self::GENERIC => TeeError::Generic,
            Self::ACCESS_DENIED => TeeError::AccessDenied,
            Self::BAD_PARAMETERS => TeeError::BadParameters,
            Self::BAD_STATE => TeeError::BadState,
            Self::ITEM_NOT_FOUND => TeeError::ItemNotFound,
            Self::OUT_OF_MEMORY => TeeError::OutOfMemory,
            Self::COMMUNICATION => TeeError::Communication,
            Self::AGENT_CRYPTO => TeeError::Crypto,
            Self::AGENT_ALREADY_INITIALIZED => TeeError::AlreadyInitialized,
            other => TeeError::Other(other),
        }
    }
}

// ============================================================================
// Status mapping
// ============================================================================

impl From<TeeError> for DrmError {
    fn from(error: TeeError) -> Self {
        match error {
            TeeError::BadParameters => DrmError::IllegalArgument,
            TeeError::BadState => DrmError::IllegalState,
            TeeError::OutOfMemory => DrmError::OutOfMemory,
            TeeError::Crypto => DrmError::Crypto,
            TeeError::AlreadyInitialized => DrmError::KeyAlreadyInitialized,
            TeeError::Generic
            | TeeError::AccessDenied
            | TeeError::ItemNotFound
            | TeeError::Communication
            | TeeError::Other(_) => DrmError::Generic,
        }
    }
}

/// Translate a raw secure-world status into a raw DRM code.
///
/// `0` stays `0`; unrecognized codes map to `DRM_ERROR_GENERIC`.
pub fn translate_status(status: u32) -> u32 {
    if status == 0 {
        return DRM_SUCCESS;
    }
    DrmError::from(TeeError::from_code(status)).code()
}
