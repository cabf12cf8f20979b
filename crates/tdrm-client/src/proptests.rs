
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aes::Aes128;
    use cbc::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
    use proptest::prelude::*;
    use tdrm_keystore::KeyStore;
    use tdrm_service::{DrmService, LicenseBuilder};
    use tdrm_stub::{DrmStub, StubConfig};
    use tdrm_tee::{LocalTee, LocalTeeConfig, DRM_AGENT_UUID};

    use crate::content::decrypt_stream;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        // Output length always equals input length and the block-aligned
        // prefix decrypts to the original text, whatever the chunk size
        #[test]
        fn test_stream_emits_what_was_read(
            key in any::<[u8; 16]>(),
            text in prop::collection::vec(any::<u8>(), 1..200),
            blocks_per_chunk in 1usize..5,
        ) {
            let tee = LocalTee::new(LocalTeeConfig::default())
                .with_service(DRM_AGENT_UUID, DrmService::new(KeyStore::in_memory()))
                .unwrap();
            let stub = DrmStub::new(Arc::new(tee), StubConfig::default());
            stub.initialize().unwrap();
            let manager = stub.open_management_session(false).unwrap();
            stub.management_init(manager).unwrap();

            let block_size = blocks_per_chunk * 16;
            let mut padded = text.clone();
            padded.resize(text.len().div_ceil(16) * 16, 0);
            let mut ciphertext = padded.clone();
            let len = ciphertext.len();
            cbc::Encryptor::<Aes128>::new((&key).into(), (&[0u8; 16]).into())
                .encrypt_padded_mut::<NoPadding>(&mut ciphertext, len)
                .unwrap();

            let blob = LicenseBuilder::for_builtin_device().build(&key).unwrap();
            let session = stub.open_decrypt_session(&blob, None, block_size, false).unwrap();
            let mut out = Vec::new();
            let written = decrypt_stream(&stub, &session, block_size, &ciphertext[..], &mut out).unwrap();

            prop_assert_eq!(written as usize, ciphertext.len());
            prop_assert_eq!(out, padded);

            stub.close_decrypt_session(session.handle).unwrap();
            stub.close_management_session(manager).unwrap();
        }
    }
}
