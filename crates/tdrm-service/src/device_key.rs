//! Device root key provisioning data.
//!
//! The agent installs this RSA-1024 private key as a token object on `INIT`.
//! License servers wrap session keys with its public half.

use tdrm_keystore::{rsa_x509_encrypt, CryptokiError, KeyTemplate, ObjectId, RsaKeyComponents};

const MODULUS: [u8; 128] = [
    0xa6, 0x52, 0xca, 0x89, 0x23, 0xdb, 0x65, 0x36, 0x08, 0x7b, 0xab, 0x86,
    0xe9, 0xac, 0x04, 0xdc, 0x40, 0x36, 0xe3, 0xe9, 0x8b, 0xbe, 0x58, 0xb9,
    0x65, 0x8f, 0x2e, 0x5a, 0x81, 0x5c, 0x59, 0xe9, 0xe6, 0x97, 0x43, 0xca,
    0xc8, 0x50, 0x71, 0xe9, 0xd0, 0x82, 0x52, 0x24, 0x52, 0x65, 0x09, 0xa3,
    0x45, 0x0b, 0xaa, 0x4b, 0x90, 0x11, 0x67, 0xe5, 0x63, 0x1a, 0xc5, 0x9a,
    0x1b, 0x23, 0x60, 0x4d, 0xfe, 0x99, 0xb7, 0x37, 0xd5, 0xf0, 0x0c, 0x78,
    0xd9, 0x0a, 0x81, 0x7c, 0x77, 0x97, 0x85, 0x35, 0x71, 0x00, 0x8d, 0xf8,
    0xc9, 0xc5, 0x98, 0xa2, 0xf0, 0x91, 0x93, 0xe9, 0x9d, 0xa4, 0xed, 0xcc,
    0xc7, 0xac, 0x79, 0x3d, 0x0e, 0xb5, 0x94, 0x1f, 0x00, 0xfe, 0x3a, 0x21,
    0xb7, 0x46, 0x38, 0x58, 0x2f, 0x47, 0xca, 0xa4, 0x62, 0x91, 0xbd, 0xd9,
    0x1f, 0x58, 0x67, 0xbb, 0xa9, 0x36, 0x8a, 0x1d,
];

const PUBLIC_EXPONENT: [u8; 3] = [
    0x01, 0x00, 0x01,
];

const PRIVATE_EXPONENT: [u8; 128] = [
    0x9a, 0x0e, 0xd5, 0xcb, 0x71, 0x8b, 0x26, 0x94, 0x86, 0x07, 0x07, 0x3a,
    0x4f, 0xf7, 0x26, 0x09, 0x5c, 0xf1, 0x7a, 0xea, 0x38, 0xa6, 0x77, 0x48,
    0x42, 0xe9, 0xfc, 0xe5, 0x98, 0x2d, 0x12, 0x9b, 0xb5, 0x1b, 0x27, 0x90,
    0x0d, 0x3b, 0x76, 0x48, 0x3c, 0xfa, 0x79, 0x5b, 0x6b, 0x76, 0x6b, 0x16,
    0xf0, 0x3d, 0x7d, 0xdf, 0xbf, 0xf2, 0x5f, 0x69, 0xfa, 0x02, 0x32, 0x46,
    0x2c, 0x1c, 0xf8, 0x75, 0xc7, 0x8a, 0xde, 0x9c, 0xf1, 0x81, 0xd1, 0xae,
    0x74, 0x7c, 0xfb, 0x93, 0x77, 0xbb, 0x35, 0xb3, 0x04, 0x4d, 0xa4, 0x6e,
    0x6f, 0xce, 0x21, 0xbb, 0xa3, 0x34, 0x6e, 0x61, 0xf9, 0xc1, 0xf2, 0x74,
    0xe5, 0x88, 0xb6, 0x33, 0xcf, 0x5c, 0x80, 0x42, 0xa5, 0x68, 0x66, 0x51,
    0x57, 0x97, 0x8d, 0x7c, 0xcb, 0x7f, 0xec, 0x33, 0xb4, 0x3f, 0x04, 0x4b,
    0x15, 0x0f, 0x5a, 0xab, 0xce, 0x24, 0x8b, 0x81,
];

const PRIME_P: [u8; 64] = [
    0xd4, 0xe4, 0xeb, 0xe3, 0x09, 0x54, 0x6b, 0xcf, 0x79, 0x90, 0x57, 0xec,
    0x0a, 0x6d, 0xe9, 0xd1, 0xe8, 0x6f, 0xa4, 0x9e, 0xd3, 0xc2, 0x90, 0xde,
    0xc8, 0x93, 0xdb, 0x46, 0x74, 0x31, 0xef, 0x64, 0x87, 0xca, 0x99, 0x61,
    0x8f, 0x6d, 0xc7, 0x40, 0x75, 0x0a, 0x4d, 0x0b, 0xac, 0x55, 0x3e, 0x61,
    0x72, 0x81, 0x82, 0x65, 0xec, 0xd8, 0x95, 0x4f, 0xf3, 0xe1, 0xb0, 0x4a,
    0x72, 0x20, 0x75, 0xd3,
];

const PRIME_Q: [u8; 64] = [
    0xc7, 0xff, 0xef, 0x77, 0x02, 0x30, 0x31, 0xaa, 0x05, 0x8d, 0x64, 0x77,
    0xc8, 0xbb, 0x4b, 0xd7, 0xe2, 0xb5, 0xb7, 0x4d, 0x30, 0xba, 0xc2, 0x17,
    0x43, 0xb9, 0x17, 0xae, 0xbb, 0xb7, 0xe6, 0xd4, 0x60, 0xd1, 0xf7, 0xe4,
    0xa6, 0x7b, 0x6b, 0x92, 0xf3, 0x69, 0xb0, 0x1d, 0x79, 0x4a, 0xf7, 0x72,
    0xeb, 0xc0, 0x3e, 0x94, 0x6b, 0xcb, 0x00, 0xd1, 0x65, 0x61, 0x76, 0x8d,
    0x3f, 0x62, 0x5a, 0x4f,
];

const EXPONENT_P: [u8; 64] = [
    0x6f, 0xad, 0xc2, 0xdc, 0x2f, 0x89, 0xbc, 0xa0, 0x72, 0xc9, 0xb8, 0x85,
    0x97, 0x16, 0xff, 0x80, 0x60, 0xa9, 0x28, 0x37, 0x35, 0x28, 0xac, 0xac,
    0x61, 0x95, 0xc6, 0x82, 0x57, 0xf3, 0xd5, 0xfb, 0xeb, 0x8b, 0xe9, 0x18,
    0x17, 0x90, 0x63, 0xe4, 0xb9, 0x40, 0xf5, 0x17, 0xb9, 0x88, 0x62, 0x17,
    0xe6, 0x64, 0x6f, 0xce, 0x1e, 0x07, 0xa3, 0x93, 0xf4, 0x80, 0xa0, 0xe4,
    0xfc, 0xa7, 0x70, 0x87,
];

const EXPONENT_Q: [u8; 64] = [
    0x4b, 0x63, 0xae, 0x60, 0xad, 0xf2, 0x7c, 0xc6, 0x1a, 0x51, 0xb2, 0x0d,
    0x75, 0x1d, 0x24, 0xf9, 0xbb, 0xfb, 0xc3, 0x9c, 0xd5, 0x41, 0x90, 0xe8,
    0x34, 0x1f, 0x11, 0x4e, 0x4c, 0x74, 0x86, 0x0e, 0x88, 0x70, 0x9d, 0x81,
    0x13, 0x40, 0x72, 0xcc, 0x71, 0xf4, 0xe4, 0xee, 0x37, 0x4a, 0x8a, 0xfc,
    0x46, 0xe1, 0xb0, 0xb5, 0x41, 0xec, 0xc3, 0xe2, 0x2a, 0xd5, 0x12, 0x5b,
    0x2c, 0x09, 0x67, 0x01,
];

const COEFFICIENT: [u8; 64] = [
    0x55, 0x7b, 0x93, 0x8c, 0x51, 0x7f, 0xce, 0x03, 0x70, 0x01, 0x27, 0xe0,
    0x91, 0x0a, 0x7b, 0x94, 0x96, 0x7d, 0xf1, 0x1c, 0x3b, 0x15, 0xca, 0xde,
    0x29, 0x15, 0xcc, 0x04, 0xc8, 0x88, 0x08, 0x54, 0x06, 0xd9, 0x97, 0xb4,
    0x63, 0x39, 0x0a, 0x5e, 0xe8, 0x15, 0x09, 0x37, 0x5e, 0x39, 0xc7, 0x77,
    0x72, 0xca, 0x41, 0xab, 0x6f, 0x4c, 0xd5, 0xa5, 0x44, 0x7a, 0x7b, 0x3f,
    0x61, 0x3b, 0xe7, 0xe0,
];

/// RSA private key in CRT form, as installed on the device.
#[derive(Clone)]
pub struct DeviceKeyMaterial {
    components: RsaKeyComponents,
}

impl DeviceKeyMaterial {
    /// The key compiled into the agent.
    pub fn builtin() -> Self {
        DeviceKeyMaterial {
            components: RsaKeyComponents {
                modulus: MODULUS.to_vec(),
                public_exponent: PUBLIC_EXPONENT.to_vec(),
                private_exponent: PRIVATE_EXPONENT.to_vec(),
                prime_1: PRIME_P.to_vec(),
                prime_2: PRIME_Q.to_vec(),
                exponent_1: EXPONENT_P.to_vec(),
                exponent_2: EXPONENT_Q.to_vec(),
                coefficient: COEFFICIENT.to_vec(),
            },
        }
    }

    pub fn from_components(components: RsaKeyComponents) -> Self {
        DeviceKeyMaterial { components }
    }

    /// Token-object template installing this key under `id`.
    pub fn template(&self, id: ObjectId) -> KeyTemplate {
        KeyTemplate::rsa_token_key(id, self.components.clone())
    }

    pub fn public_key(&self) -> DevicePublicKey {
        DevicePublicKey {
            modulus: self.components.modulus.clone(),
            public_exponent: self.components.public_exponent.clone(),
        }
    }

    /// Modulus size in bytes.
    pub fn modulus_len(&self) -> usize {
        self.components.modulus_len()
    }
}

impl std::fmt::Debug for DeviceKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeyMaterial")
            .field("components", &self.components)
            .finish()
    }
}

/// Public half of a device key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePublicKey {
    pub modulus: Vec<u8>,
    pub public_exponent: Vec<u8>,
}

impl DevicePublicKey {
    pub fn modulus_len(&self) -> usize {
        self.modulus.iter().skip_while(|b| **b == 0).count()
    }

    /// Raw RSA over `block`, which must be numerically smaller than the modulus.
    pub fn wrap(&self, block: &[u8]) -> Result<Vec<u8>, CryptokiError> {
        rsa_x509_encrypt(&self.modulus, &self.public_exponent, block)
    }
}
