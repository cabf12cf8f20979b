//! Stub configuration.

use tdrm_tee::ClientManifest;

use crate::registry::DEFAULT_MAX_SESSIONS;

/// Property granting the right to decrypt content.
pub const DECRYPT_RIGHT_PROPERTY: &str = "example_drm.allow_decrypt_content";

#[derive(Debug, Clone)]
pub struct StubConfig {
    /// Signed client manifest presented when opening decrypt sessions.
    pub manifest: Vec<u8>,
    /// Cap on sessions open at the same time.
    pub max_sessions: usize,
}

impl Default for StubConfig {
    fn default() -> Self {
        StubConfig {
            manifest: ClientManifest::new()
                .with(DECRYPT_RIGHT_PROPERTY, "true")
                .to_bytes(),
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl StubConfig {
    pub fn with_manifest(mut self, manifest: &ClientManifest) -> Self {
        self.manifest = manifest.to_bytes();
        self
    }
}
