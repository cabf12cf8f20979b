//! Command-line definition and the client flow.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tdrm_proto::{status_code, DrmError};
use tdrm_stub::{DecryptSession, DrmStub};
use tracing::{error, info, warn};

use crate::config::{CliOverrides, Config};
use crate::content::{decrypt_stream, ContentError};
use crate::environment::AgentEnvironment;

/// TDRM client - decrypts content with a license key
#[derive(Parser, Debug)]
#[command(name = "tdrm-client")]
#[command(version, about = "Decrypts the content file with the license key")]
pub struct Cli {
    /// File containing the license
    #[arg(value_name = "LICENSE")]
    pub license: Option<PathBuf>,

    /// File containing the encrypted content
    #[arg(value_name = "CONTENT")]
    pub content: Option<PathBuf>,

    /// Install the device root key. Done once when the platform is set up,
    /// before any content is decrypted.
    #[arg(long)]
    pub init: bool,

    /// Erase the key store of the selected agent
    #[arg(long)]
    pub clean: bool,

    /// Use the stiplet agent
    #[arg(long)]
    pub use_stiplet: bool,

    /// Bytes decrypted per call (multiple of 16)
    #[arg(long)]
    pub block_size: Option<usize>,

    /// Directory holding the persisted key stores
    #[arg(long, env = "TDRM_KEYSTORE_DIR")]
    pub keystore_dir: Option<PathBuf>,

    /// Write decrypted content to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Debug mode (protocol-level tracing)
    #[arg(long)]
    pub debug: bool,

    /// Config file path
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Flags that override the config file.
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            debug: if self.debug { Some(true) } else { None },
            use_stiplet: if self.use_stiplet { Some(true) } else { None },
            block_size: self.block_size,
            keystore_dir: self.keystore_dir.clone(),
        }
    }

    /// Run the client and return the DRM status code of the run.
    ///
    /// `Err` is reserved for failures outside the DRM protocol, such as an
    /// unreadable key store or an invalid configuration.
    pub fn execute_with_config(&self, config: Config, out: &mut dyn Write) -> anyhow::Result<u32> {
        let config = config.with_overrides(&self.overrides());
        config.validate()?;

        let content_paths = match (&self.license, &self.content) {
            (Some(license), Some(content)) => Some((license.as_path(), content.as_path())),
            (Some(_), None) => {
                eprintln!("Error: no content file specified.");
                return Ok(DrmError::IllegalArgument.code());
            }
            (None, _) if self.init || self.clean => None,
            (None, _) => {
                eprintln!("Error: nothing to do; give a license and a content file, or --init / --clean.");
                return Ok(DrmError::IllegalArgument.code());
            }
        };

        let env = AgentEnvironment::open(&config)?;
        let stub = env.stub();
        if let Err(e) = stub.initialize() {
            eprintln!("Error initializing the DRM agent: {}", e.name());
            return Ok(e.code());
        }

        let use_stiplet = config.client.use_stiplet;
        let mut result = Ok(());
        if self.init {
            result = install_device_key(stub, use_stiplet, out);
            if let Err(e) = result {
                eprintln!("Error: device key initialization failed ({}).", e.name());
            }
        }
        if result.is_ok() && self.clean {
            result = clean_key_store(stub, use_stiplet, out);
            if let Err(e) = result {
                eprintln!("Error: clean up failed ({}).", e.name());
            }
        }
        if result.is_ok() {
            if let Some((license, content)) = content_paths {
                result = self.decrypt_content(stub, &config, license, content, out);
            }
        }

        if let Err(e) = stub.finalize() {
            warn!(error = %e, "finalize failed");
        }
        Ok(status_code(&result))
    }

    fn decrypt_content(
        &self,
        stub: &DrmStub,
        config: &Config,
        license: &Path,
        content: &Path,
        out: &mut dyn Write,
    ) -> Result<(), DrmError> {
        let encrypted_key = match std::fs::read(license) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                eprintln!("Error: empty license file: {}.", license.display());
                return Err(DrmError::IllegalArgument);
            }
            Err(e) => {
                eprintln!("Error: cannot read license file {}: {e}.", license.display());
                return Err(DrmError::IllegalArgument);
            }
        };

        let block_size = config.client.block_size;
        let session = stub
            .open_decrypt_session(&encrypted_key, None, block_size, config.client.use_stiplet)
            .map_err(|e| {
                eprintln!("Error opening decryption session: {}", e.name());
                e
            })?;

        let result = self.write_content(stub, &session, block_size, content, out);
        if let Err(e) = stub.close_decrypt_session(session.handle) {
            warn!(session = %session.handle, error = %e, "closing decrypt session failed");
        }
        result
    }

    fn write_content(
        &self,
        stub: &DrmStub,
        session: &DecryptSession,
        block_size: usize,
        content: &Path,
        out: &mut dyn Write,
    ) -> Result<(), DrmError> {
        let input = match File::open(content) {
            Ok(file) => BufReader::new(file),
            Err(e) => {
                eprintln!("Error: cannot open content file {}: {e}.", content.display());
                return Err(DrmError::IllegalArgument);
            }
        };

        let result = match &self.output {
            Some(path) => open_output(path)
                .map_err(|e| {
                    eprintln!("Error: {e:#}");
                    DrmError::Generic
                })
                .and_then(|mut file| {
                    decrypt_stream(stub, session, block_size, input, &mut file).map_err(report)
                }),
            None => write_framed(stub, session, block_size, input, out).map_err(report),
        };

        let written = result?;
        info!(bytes = written, "content decrypted");
        Ok(())
    }
}

fn write_framed<R: Read>(
    stub: &DrmStub,
    session: &DecryptSession,
    block_size: usize,
    input: R,
    mut out: &mut dyn Write,
) -> Result<u64, ContentError> {
    writeln!(out, "Decrypted content:\n\n--- BEGIN ---").map_err(ContentError::Write)?;
    let written = decrypt_stream(stub, session, block_size, input, &mut out)?;
    writeln!(out, "\n--- END ---").map_err(ContentError::Write)?;
    Ok(written)
}

fn open_output(path: &Path) -> anyhow::Result<File> {
    File::create(path).with_context(|| format!("cannot create output file {}", path.display()))
}

fn report(e: ContentError) -> DrmError {
    error!(error = %e, "content decryption failed");
    eprintln!("Error while decrypting content: {e}");
    e.drm_error()
}

/// Open a management session, run `command` on it, and close it. A failure
/// to close after a successful command is logged and ignored.
fn with_management_session(
    stub: &DrmStub,
    use_stiplet: bool,
    command: impl FnOnce(&DrmStub, tdrm_proto::SessionHandle) -> Result<(), DrmError>,
) -> Result<(), DrmError> {
    let session = stub.open_management_session(use_stiplet).map_err(|e| {
        eprintln!("Error: cannot open management session ({}).", e.name());
        e
    })?;
    let result = command(stub, session);
    if let Err(e) = stub.close_management_session(session) {
        warn!(session = %session, error = %e, "closing management session failed");
    }
    result
}

fn install_device_key(stub: &DrmStub, use_stiplet: bool, out: &mut dyn Write) -> Result<(), DrmError> {
    with_management_session(stub, use_stiplet, DrmStub::management_init)?;
    let _ = writeln!(out, "Device key installed.");
    Ok(())
}

fn clean_key_store(stub: &DrmStub, use_stiplet: bool, out: &mut dyn Write) -> Result<(), DrmError> {
    with_management_session(stub, use_stiplet, DrmStub::management_clean)?;
    let _ = writeln!(out, "Key store cleaned.");
    Ok(())
}
