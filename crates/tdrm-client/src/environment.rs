//! In-process DRM agents and the stub connected to them.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tdrm_keystore::KeyStore;
use tdrm_service::DrmService;
use tdrm_stub::{DrmStub, StubConfig};
use tdrm_tee::{ClientManifest, LocalTee, LocalTeeConfig, DRM_AGENT_UUID, DRM_STIPLET_UUID};
use tracing::{debug, warn};

use crate::config::Config;

/// Key store file of the primary agent.
pub const PRIMARY_STORE_FILE: &str = "keystore-primary.json";

/// Key store file of the stiplet agent.
pub const STIPLET_STORE_FILE: &str = "keystore-stiplet.json";

/// Both agents hosted in a local secure world, and a stub talking to them.
pub struct AgentEnvironment {
    tee: Arc<LocalTee<DrmService>>,
    stub: DrmStub,
}

impl AgentEnvironment {
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let (primary, stiplet) = match config.keystore_dir() {
            Some(dir) => (open_store(&dir, PRIMARY_STORE_FILE)?, open_store(&dir, STIPLET_STORE_FILE)?),
            None => {
                warn!("no key store directory available; device keys will not persist");
                (KeyStore::in_memory(), KeyStore::in_memory())
            }
        };

        let tee = LocalTee::new(LocalTeeConfig::default())
            .with_service(DRM_AGENT_UUID, DrmService::new(primary))
            .map_err(|e| anyhow::anyhow!("cannot start the DRM agent: {e}"))?
            .with_service(DRM_STIPLET_UUID, DrmService::new(stiplet))
            .map_err(|e| anyhow::anyhow!("cannot start the stiplet agent: {e}"))?;
        let tee = Arc::new(tee);

        let mut stub_config = StubConfig::default();
        if let Some(path) = config.client.manifest_path.as_deref() {
            let bytes = std::fs::read(path)
                .with_context(|| format!("cannot read client manifest {}", path.display()))?;
            let manifest = ClientManifest::parse(&bytes)
                .with_context(|| format!("invalid client manifest {}", path.display()))?;
            debug!(path = %path.display(), properties = manifest.len(), "client manifest loaded");
            stub_config.manifest = bytes;
        }

        let stub = DrmStub::new(tee.clone(), stub_config);
        Ok(AgentEnvironment { tee, stub })
    }

    pub fn stub(&self) -> &DrmStub {
        &self.stub
    }

    /// The agent service the stub reaches with `use_stiplet`.
    pub fn agent(&self, use_stiplet: bool) -> Option<&Arc<DrmService>> {
        let id = if use_stiplet { &DRM_STIPLET_UUID } else { &DRM_AGENT_UUID };
        self.tee.service(id)
    }
}

fn open_store(dir: &Path, file: &str) -> anyhow::Result<KeyStore> {
    let path = dir.join(file);
    KeyStore::open(&path).with_context(|| format!("cannot open key store {}", path.display()))
}
