//! Block-wise content decryption.

use std::io::{self, Read, Write};

use tdrm_proto::DrmError;
use tdrm_stub::{DecryptSession, DrmStub};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("cannot read content: {0}")]
    Read(#[source] io::Error),

    #[error("cannot write decrypted content: {0}")]
    Write(#[source] io::Error),

    #[error("decryption failed: {0}")]
    Drm(#[from] DrmError),
}

impl ContentError {
    /// DRM code reported for this failure.
    pub fn drm_error(&self) -> DrmError {
        match self {
            ContentError::Read(_) => DrmError::IllegalArgument,
            ContentError::Write(_) => DrmError::Generic,
            ContentError::Drm(e) => *e,
        }
    }
}

/// Read until `chunk` is full or the input ends.
fn fill_chunk<R: Read>(input: &mut R, chunk: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < chunk.len() {
        match input.read(&mut chunk[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Decrypt `input` through `session` in chunks of `block_size` bytes.
///
/// A short final chunk is zero-filled before decryption; only the bytes
/// actually read are written to `output`. Returns the number of bytes
/// written.
pub fn decrypt_stream<R: Read, W: Write>(
    stub: &DrmStub,
    session: &DecryptSession,
    block_size: usize,
    mut input: R,
    output: &mut W,
) -> Result<u64, ContentError> {
    let mut chunk = vec![0u8; block_size];
    let mut written = 0u64;

    loop {
        chunk.fill(0);
        let read = fill_chunk(&mut input, &mut chunk).map_err(ContentError::Read)?;
        if read == 0 {
            break;
        }

        session.buffer.write_at(0, &chunk).map_err(DrmError::from)?;
        stub.decrypt(session.handle, 0, block_size)?;
        let clear = session.buffer.read_at(0, read).map_err(DrmError::from)?;
        output.write_all(&clear).map_err(ContentError::Write)?;

        written += read as u64;
        trace!(session = %session.handle, bytes = read, "chunk decrypted");
        if read < block_size {
            break;
        }
    }

    output.flush().map_err(ContentError::Write)?;
    Ok(written)
}
