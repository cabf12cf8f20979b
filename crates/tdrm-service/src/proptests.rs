
#[cfg(test)]
mod tests {
    use aes::Aes128;
    use cbc::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
    use proptest::prelude::*;
    use tdrm_keystore::KeyStore;
    use tdrm_proto::{Command, CommandId, LoginMethod, OpenRequest};
    use tdrm_tee::{
        ClientIdentity, ClientManifest, ShortcutPolicy, ShortcutRegistrar, TrustedService, UpdateShortcut,
    };
    use uuid::Uuid;

    use crate::agent::DrmService;
    use crate::license::LicenseBuilder;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        // The shortcut installed for a license decrypts content encrypted
        // under the licensed key
        #[test]
        fn test_license_key_decrypts_content(
            key in any::<[u8; 16]>(),
            blocks in prop::collection::vec(any::<[u8; 16]>(), 1..6),
        ) {
            let service = DrmService::new(KeyStore::in_memory());
            service.create().unwrap();
            let manager = ClientIdentity::new(Uuid::nil(), LoginMethod::Application, None);
            let mut registrar = ShortcutRegistrar::new(ShortcutPolicy::Enabled);
            let mut management = service
                .open_session(&manager, OpenRequest::Management, &mut registrar)
                .unwrap();
            service.invoke_command(&mut management, Command::Init).unwrap();

            let blob = LicenseBuilder::for_builtin_device().build(&key).unwrap();
            let manifest = ClientManifest::new().with("example_drm.allow_decrypt_content", "true");
            let player = ClientIdentity::new(Uuid::nil(), LoginMethod::Authentication, Some(&manifest));
            let mut registrar = ShortcutRegistrar::new(ShortcutPolicy::Enabled);
            let session = service
                .open_session(
                    &player,
                    OpenRequest::Decrypt { encrypted_key: &blob, signature: b"" },
                    &mut registrar,
                )
                .unwrap();

            let plaintext = blocks.concat();
            let mut data = plaintext.clone();
            let len = data.len();
            cbc::Encryptor::<Aes128>::new((&key).into(), (&[0u8; 16]).into())
                .encrypt_padded_mut::<NoPadding>(&mut data, len)
                .unwrap();

            let (command, mut shortcut) = registrar.into_installed().unwrap();
            prop_assert_eq!(command, CommandId::Decrypt);
            shortcut.update(&mut data).unwrap();
            prop_assert_eq!(data, plaintext);

            drop(shortcut);
            service.close_session(session);
            service.close_session(management);
        }
    }
}
