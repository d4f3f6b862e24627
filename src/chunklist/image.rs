// src/chunklist/image.rs - image bytes against the chunk table
// Strictly ordered and all-or-nothing: the first bad chunk ends the pass.

use std::io::{self, Read};

use sha2::{Digest, Sha256};
use tracing::debug;

use super::digest::Sha256Digest;
use super::ChunkDescriptor;
use crate::error::{Error, Result};

/// Told about each chunk before it is read. `index` is 1-based.
pub trait ChunkObserver {
    fn chunk(&mut self, index: usize, total: usize, size: u32);
    fn done(&mut self) {}
}

impl ChunkObserver for () {
    fn chunk(&mut self, _: usize, _: usize, _: u32) {}
}

/// Check `image` against `chunks` and return the number of bytes verified.
/// The image must end exactly at the last chunk boundary.
pub fn verify_image<R: Read>(
    chunks: &[ChunkDescriptor],
    mut image: R,
    observer: &mut dyn ChunkObserver,
) -> Result<u64> {
    let mut buf = Vec::new();
    let mut total = 0u64;

    for (i, chunk) in chunks.iter().enumerate() {
        let index = i + 1;
        observer.chunk(index, chunks.len(), chunk.size);

        buf.resize(chunk.size as usize, 0);
        let read = read_full(&mut image, &mut buf)?;
        if read != buf.len() {
            return Err(Error::ChunkSize {
                index,
                expected: chunk.size,
                read: read as u64,
            });
        }

        let hash: Sha256Digest = Sha256::digest(&buf).into();
        if hash != chunk.hash {
            return Err(Error::ChunkHash { index });
        }
        total += u64::from(chunk.size);
    }

    let mut extra = [0u8; 1];
    if read_full(&mut image, &mut extra)? > 0 {
        return Err(Error::ImageTooLarge);
    }

    observer.done();
    debug!(chunks = chunks.len(), bytes = total, "image matches chunklist");
    Ok(total)
}

/// Fill `buf` unless the stream ends first; returns bytes filled.
fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
