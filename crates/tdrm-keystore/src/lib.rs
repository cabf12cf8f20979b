//! Cryptographic key store used by the DRM agent inside the secure world.
//!
//! The API follows the shape of a PKCS#11 token: a service opens a session,
//! logs in, creates or finds key objects by id, and runs decryption
//! operations keyed by those objects. Two mechanisms are supported:
//! raw RSA for unwrapping session keys and AES-CBC for content.

#![forbid(unsafe_code)]

pub mod error;
pub mod mechanism;
pub mod object;
pub mod store;

#[cfg(test)]
mod proptests;
#[cfg(test)]
mod testing;

pub use error::CryptokiError;
pub use mechanism::{rsa_x509_encrypt, Mechanism, AES_BLOCK_SIZE};
pub use object::{
    KeyMaterial, KeyTemplate, KeyType, ObjectClass, ObjectFilter, ObjectHandle, ObjectId,
    RsaKeyComponents, SecretValue,
};
pub use store::{KeyStore, SessionFlags, StoreSession};
