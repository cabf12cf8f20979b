//! Key objects and the templates used to create them.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptokiError;

/// Handle to an object inside a [`KeyStore`](crate::KeyStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub u32);

/// Object class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectClass {
    PrivateKey,
    SecretKey,
}

/// Key algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Rsa,
    Aes,
}

/// Application-chosen object identifier (`CKA_ID`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(#[serde(with = "hex::serde")] pub Vec<u8>);

impl ObjectId {
    pub fn new(bytes: &[u8]) -> Self {
        ObjectId(bytes.to_vec())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// RSA private key in CRT form. All integers are big-endian.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct RsaKeyComponents {
    #[serde(with = "hex::serde")]
    pub modulus: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub public_exponent: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub private_exponent: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub prime_1: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub prime_2: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub exponent_1: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub exponent_2: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub coefficient: Vec<u8>,
}

impl RsaKeyComponents {
    /// Modulus size in bytes, ignoring leading zero bytes.
    pub fn modulus_len(&self) -> usize {
        let leading = self.modulus.iter().take_while(|b| **b == 0).count();
        self.modulus.len() - leading
    }
}

impl fmt::Debug for RsaKeyComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaKeyComponents")
            .field("modulus_bits", &(self.modulus_len() * 8))
            .finish_non_exhaustive()
    }
}

/// Raw secret key bytes.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue(#[serde(with = "hex::serde")] Vec<u8>);

impl SecretValue {
    pub fn new(bytes: &[u8]) -> Self {
        SecretValue(bytes.to_vec())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretValue({} bytes)", self.0.len())
    }
}

/// Key material carried by an object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum KeyMaterial {
    Rsa(RsaKeyComponents),
    Secret(SecretValue),
}

/// Attributes of an object to create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyTemplate {
    pub class: ObjectClass,
    pub id: ObjectId,
    pub key_type: KeyType,
    /// Token objects outlive the session that created them and are persisted.
    pub token: bool,
    /// Key may be used for decryption.
    pub decrypt: bool,
    pub material: KeyMaterial,
}

impl KeyTemplate {
    /// Session-scoped AES decryption key.
    pub fn aes_session_key(id: ObjectId, value: &[u8]) -> Self {
        KeyTemplate {
            class: ObjectClass::SecretKey,
            id,
            key_type: KeyType::Aes,
            token: false,
            decrypt: true,
            material: KeyMaterial::Secret(SecretValue::new(value)),
        }
    }

    /// Persistent RSA private decryption key.
    pub fn rsa_token_key(id: ObjectId, components: RsaKeyComponents) -> Self {
        KeyTemplate {
            class: ObjectClass::PrivateKey,
            id,
            key_type: KeyType::Rsa,
            token: true,
            decrypt: true,
            material: KeyMaterial::Rsa(components),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), CryptokiError> {
        match (self.class, self.key_type, &self.material) {
            (ObjectClass::PrivateKey, KeyType::Rsa, KeyMaterial::Rsa(rsa)) => {
                if rsa.modulus_len() == 0 || rsa.public_exponent.is_empty() {
                    return Err(CryptokiError::TemplateInconsistent(
                        "RSA key without modulus or exponent".to_string(),
                    ));
                }
                Ok(())
            }
            (ObjectClass::SecretKey, KeyType::Aes, KeyMaterial::Secret(value)) => {
                match value.len() {
                    16 | 24 | 32 => Ok(()),
                    other => Err(CryptokiError::KeySizeRange(other)),
                }
            }
            (class, key_type, _) => Err(CryptokiError::TemplateInconsistent(format!(
                "{class:?} / {key_type:?} does not match the supplied material"
            ))),
        }
    }
}

/// Search criteria for [`KeyStore::find_objects`](crate::KeyStore::find_objects).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectFilter {
    All,
    Id(ObjectId),
}

impl ObjectFilter {
    pub(crate) fn matches(&self, template: &KeyTemplate) -> bool {
        match self {
            ObjectFilter::All => true,
            ObjectFilter::Id(id) => template.id == *id,
        }
    }
}
