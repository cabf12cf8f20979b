
#[cfg(test)]
mod tests {
    use aes::Aes128;
    use cbc::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
    use proptest::prelude::*;

    use crate::mechanism::Mechanism;
    use crate::object::{KeyTemplate, ObjectId};
    use crate::store::{KeyStore, SessionFlags};

    fn encrypt(key: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
        let mut buf = plaintext.to_vec();
        let len = buf.len();
        cbc::Encryptor::<Aes128>::new(key.into(), (&[0u8; 16]).into())
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .unwrap();
        buf
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        // Chunked updates produce the same plaintext as one update
        #[test]
        fn test_cbc_chunking_is_transparent(
            key in any::<[u8; 16]>(),
            blocks in prop::collection::vec(any::<[u8; 16]>(), 1..12),
            split in any::<prop::sample::Index>(),
        ) {
            let plaintext: Vec<u8> = blocks.concat();
            let mut data = encrypt(&key, &plaintext);

            let store = KeyStore::in_memory();
            store.initialize().unwrap();
            let session = store.open_session(SessionFlags::READ_ONLY).unwrap();
            store.login(session).unwrap();
            let handle = store
                .create_object(session, KeyTemplate::aes_session_key(ObjectId::new(&[0, 2]), &key))
                .unwrap();
            store.decrypt_init(session, Mechanism::aes_cbc_zero_iv(), handle).unwrap();

            let at = split.index(blocks.len() + 1) * 16;
            let (head, tail) = data.split_at_mut(at);
            store.decrypt_update(session, head).unwrap();
            store.decrypt_update(session, tail).unwrap();
            store.decrypt_final(session).unwrap();

            prop_assert_eq!(data, plaintext);
        }

        // Unaligned lengths never decrypt
        #[test]
        fn test_unaligned_update_rejected(len in 1usize..200) {
            prop_assume!(len % 16 != 0);
            let store = KeyStore::in_memory();
            store.initialize().unwrap();
            let session = store.open_session(SessionFlags::READ_ONLY).unwrap();
            store.login(session).unwrap();
            let handle = store
                .create_object(session, KeyTemplate::aes_session_key(ObjectId::new(&[0, 2]), &[1u8; 16]))
                .unwrap();
            store.decrypt_init(session, Mechanism::aes_cbc_zero_iv(), handle).unwrap();

            let mut data = vec![0u8; len];
            prop_assert!(store.decrypt_update(session, &mut data).is_err());
        }
    }
}
