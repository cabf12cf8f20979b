//! Decryption mechanisms supported by the key store.
//!
//! - `RsaX509`: raw RSA (no padding), single-part only
//! - `AesCbc`: AES-CBC without padding, single- or multi-part; the CBC chain
//!   carries across `decrypt_update` calls

use aes::{Aes128, Aes192, Aes256};
use cbc::{
    cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit},
    Decryptor,
};
use rand_core::OsRng;
use rsa::{
    hazmat::{rsa_decrypt, rsa_encrypt},
    BigUint, RsaPrivateKey, RsaPublicKey,
};
use tracing::trace;
use zeroize::Zeroizing;

use crate::error::CryptokiError;
use crate::object::RsaKeyComponents;

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// Decryption mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    RsaX509,
    AesCbc { iv: [u8; AES_BLOCK_SIZE] },
}

impl Mechanism {
    /// AES-CBC with an all-zero IV.
    pub const fn aes_cbc_zero_iv() -> Self {
        Mechanism::AesCbc {
            iv: [0u8; AES_BLOCK_SIZE],
        }
    }
}

/// State of a multi-part decryption.
pub(crate) struct CbcStream {
    key: Zeroizing<Vec<u8>>,
    iv: [u8; AES_BLOCK_SIZE],
}

impl CbcStream {
    pub(crate) fn new(key: &[u8], iv: [u8; AES_BLOCK_SIZE]) -> Self {
        Self {
            key: Zeroizing::new(key.to_vec()),
            iv,
        }
    }

    /// Decrypt `data` in place and advance the chain.
    pub(crate) fn update(&mut self, data: &mut [u8]) -> Result<(), CryptokiError> {
        self.iv = cbc_decrypt_in_place(&self.key, &self.iv, data)?;
        Ok(())
    }
}

/// AES-CBC decrypt `data` in place, returning the IV for the next chunk.
pub(crate) fn cbc_decrypt_in_place(
    key: &[u8],
    iv: &[u8; AES_BLOCK_SIZE],
    data: &mut [u8],
) -> Result<[u8; AES_BLOCK_SIZE], CryptokiError> {
    if data.is_empty() {
        return Ok(*iv);
    }
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(CryptokiError::DataLenRange(data.len()));
    }

    // The next IV is the last ciphertext block, captured before it is overwritten.
    let mut next_iv = [0u8; AES_BLOCK_SIZE];
    next_iv.copy_from_slice(&data[data.len() - AES_BLOCK_SIZE..]);

    let len = data.len();
    let result = match key.len() {
        16 => Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(|_| CryptokiError::KeySizeRange(key.len()))?
            .decrypt_padded_mut::<NoPadding>(data)
            .map(|_| ()),
        24 => Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(|_| CryptokiError::KeySizeRange(key.len()))?
            .decrypt_padded_mut::<NoPadding>(data)
            .map(|_| ()),
        32 => Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(|_| CryptokiError::KeySizeRange(key.len()))?
            .decrypt_padded_mut::<NoPadding>(data)
            .map(|_| ()),
        other => return Err(CryptokiError::KeySizeRange(other)),
    };
    result.map_err(|_| CryptokiError::EncryptedDataInvalid)?;

    trace!(bytes = len, "aes-cbc: chunk decrypted");
    Ok(next_iv)
}

fn to_private_key(key: &RsaKeyComponents) -> Result<RsaPrivateKey, CryptokiError> {
    RsaPrivateKey::from_components(
        BigUint::from_bytes_be(&key.modulus),
        BigUint::from_bytes_be(&key.public_exponent),
        BigUint::from_bytes_be(&key.private_exponent),
        vec![
            BigUint::from_bytes_be(&key.prime_1),
            BigUint::from_bytes_be(&key.prime_2),
        ],
    )
    .map_err(|e| CryptokiError::DeviceError(e.to_string()))
}

/// Raw RSA private-key operation.
///
/// `data` must be exactly as long as the modulus; the result is left-padded
/// with zeros to that same length.
pub(crate) fn rsa_x509_decrypt(
    key: &RsaKeyComponents,
    data: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptokiError> {
    let modulus_len = key.modulus_len();
    if data.len() != modulus_len {
        return Err(CryptokiError::EncryptedDataLenRange(data.len()));
    }

    let private_key = to_private_key(key)?;
    let plaintext = rsa_decrypt(Some(&mut OsRng), &private_key, &BigUint::from_bytes_be(data))
        .map_err(|_| CryptokiError::EncryptedDataInvalid)?;
    let plaintext = Zeroizing::new(plaintext.to_bytes_be());

    let mut buffer = Zeroizing::new(vec![0u8; modulus_len]);
    let start = buffer.len().saturating_sub(plaintext.len());
    buffer[start..].copy_from_slice(&plaintext);
    Ok(buffer)
}

/// Raw RSA public-key operation, used to wrap keys for a device.
///
/// `block` must be shorter than or as long as the modulus and numerically
/// smaller than it; the result is left-padded to the modulus length.
pub fn rsa_x509_encrypt(
    modulus: &[u8],
    public_exponent: &[u8],
    block: &[u8],
) -> Result<Vec<u8>, CryptokiError> {
    let public_key = RsaPublicKey::new(
        BigUint::from_bytes_be(modulus),
        BigUint::from_bytes_be(public_exponent),
    )
    .map_err(|e| CryptokiError::DeviceError(e.to_string()))?;

    let modulus_len = modulus.iter().skip_while(|b| **b == 0).count();
    if block.len() > modulus_len {
        return Err(CryptokiError::DataLenRange(block.len()));
    }
    let m = BigUint::from_bytes_be(block);
    if m >= BigUint::from_bytes_be(modulus) {
        return Err(CryptokiError::DataLenRange(block.len()));
    }

    let c = rsa_encrypt(&public_key, &m).map_err(|e| CryptokiError::DeviceError(e.to_string()))?;
    let c = c.to_bytes_be();
    let mut out = vec![0u8; modulus_len];
    let start = out.len().saturating_sub(c.len());
    out[start..].copy_from_slice(&c);
    Ok(out)
}
