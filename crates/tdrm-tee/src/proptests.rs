
#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use crate::identity::ClientManifest;
    use crate::memory::SharedBuffer;

    proptest! {
        // Serialized manifests parse back to the same properties
        #[test]
        fn test_manifest_round_trip(
            props in prop::collection::btree_map("[a-z][a-z0-9_.]{0,15}", "[ -~]{0,24}", 0..8)
        ) {
            let mut manifest = ClientManifest::new();
            for (name, value) in &props {
                manifest = manifest.with(name.clone(), value.trim().to_string());
            }
            let parsed = ClientManifest::parse(&manifest.to_bytes()).unwrap();
            prop_assert_eq!(parsed, manifest);
        }

        // Parsing arbitrary bytes never panics
        #[test]
        fn test_manifest_parse_total(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = ClientManifest::parse(&bytes);
        }

        // Out-of-range reads and writes are rejected, in-range ones succeed
        #[test]
        fn test_buffer_bounds(len in 0usize..64, offset in 0usize..80, count in 0usize..80) {
            let buffer = SharedBuffer::new(len);
            let fits = offset + count <= len;
            prop_assert_eq!(buffer.read_at(offset, count).is_ok(), fits);
            prop_assert_eq!(buffer.write_at(offset, &vec![1u8; count]).is_ok(), fits);
        }
    }
}
