
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aes::Aes128;
    use cbc::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
    use proptest::prelude::*;
    use tdrm_keystore::KeyStore;
    use tdrm_service::{DrmService, LicenseBuilder};
    use tdrm_tee::{LocalTee, LocalTeeConfig, DRM_AGENT_UUID};

    use crate::{DrmStub, StubConfig};

    fn encrypt(key: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
        let mut data = plaintext.to_vec();
        let len = data.len();
        cbc::Encryptor::<Aes128>::new(key.into(), (&[0u8; 16]).into())
            .encrypt_padded_mut::<NoPadding>(&mut data, len)
            .unwrap();
        data
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        // Content encrypted under a licensed key comes back unchanged, however
        // it is split across decrypt calls
        #[test]
        fn test_decrypt_round_trip(
            key in any::<[u8; 16]>(),
            blocks in prop::collection::vec(any::<[u8; 16]>(), 1..8),
            split in 0usize..8,
        ) {
            let tee = LocalTee::new(LocalTeeConfig::default())
                .with_service(DRM_AGENT_UUID, DrmService::new(KeyStore::in_memory()))
                .unwrap();
            let stub = DrmStub::new(Arc::new(tee), StubConfig::default());
            stub.initialize().unwrap();
            let manager = stub.open_management_session(false).unwrap();
            stub.management_init(manager).unwrap();

            let plaintext = blocks.concat();
            let ciphertext = encrypt(&key, &plaintext);
            let blob = LicenseBuilder::for_builtin_device().build(&key).unwrap();
            let session = stub
                .open_decrypt_session(&blob, None, plaintext.len(), false)
                .unwrap();
            session.buffer.write_at(0, &ciphertext).unwrap();

            let split = split.min(blocks.len()) * 16;
            stub.decrypt(session.handle, 0, split).unwrap();
            stub.decrypt(session.handle, split, plaintext.len() - split).unwrap();
            prop_assert_eq!(session.buffer.to_vec(), plaintext);

            stub.close_decrypt_session(session.handle).unwrap();
            stub.close_management_session(manager).unwrap();
            stub.finalize().unwrap();
        }
    }
}
