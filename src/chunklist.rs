//! chunklist.rs - Chunklist manifest reader
//!
//! A chunklist describes a recovery image as an ordered run of chunks,
//! each with its length and SHA-256, followed by a trailer that either
//! signs or digests everything before it.
//!
//! Layout (little-endian):
//!   +----------------------+ 0
//!   | magic = b"CNKL"      | 4  (u8[4])
//!   | header_size          | 4  (u32 LE, == 36)
//!   | file_version         | 1  (u8)
//!   | chunk_method         | 1  (u8)
//!   | signature_method     | 1  (u8)  0 none, 1 RSA-2048, 2 SHA-256
//!   | reserved             | 1  (u8)
//!   | chunk_count          | 8  (u64 LE)
//!   | chunk_offset         | 8  (u64 LE, == header_size)
//!   | signature_offset     | 8  (u64 LE, == chunk_offset + 36 * count)
//!   +----------------------+ 36
//!   | chunk_count x        |
//!   |   size  (u32 LE)     |
//!   |   hash  (u8[32])     |
//!   +----------------------+ signature_offset
//!   | trailer (0/256/32)   |
//!   +----------------------+

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub mod digest;
pub mod image;
pub mod signature;
#[cfg(test)]
pub(crate) mod testkey;

pub use digest::{DigestAccumulator, Sha256Digest};
pub use image::{verify_image, ChunkObserver};
pub use signature::{Authentication, SignatureMethod, TrustAnchor, EFI_ROM_KEY};

pub const MAGIC: &[u8; 4] = b"CNKL";
pub const HEADER_LEN: usize = 36;
pub const CHUNK_LEN: usize = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ManifestHeader {
    pub magic: [u8; 4],
    pub header_size: u32,
    pub file_version: u8,
    pub chunk_method: u8,
    pub signature_method: u8,
    pub reserved: u8,
    pub chunk_count: u64,
    pub chunk_offset: u64,
    pub signature_offset: u64,
}

impl ManifestHeader {
    /// Decode a raw header. Checks magic first, then layout consistency.
    /// The signature method byte is kept raw; the trailer check decides it.
    pub fn decode(raw: &[u8; HEADER_LEN]) -> Result<Self> {
        let magic = [raw[0], raw[1], raw[2], raw[3]];
        if &magic != MAGIC {
            return Err(Error::BadMagic(magic));
        }

        let header = Self {
            magic,
            header_size: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            file_version: raw[8],
            chunk_method: raw[9],
            signature_method: raw[10],
            reserved: raw[11],
            chunk_count: le_u64(&raw[12..20]),
            chunk_offset: le_u64(&raw[20..28]),
            signature_offset: le_u64(&raw[28..36]),
        };
        header.validate_layout()?;
        Ok(header)
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut raw = [0u8; HEADER_LEN];
        raw[0..4].copy_from_slice(&self.magic);
        raw[4..8].copy_from_slice(&self.header_size.to_le_bytes());
        raw[8] = self.file_version;
        raw[9] = self.chunk_method;
        raw[10] = self.signature_method;
        raw[11] = self.reserved;
        raw[12..20].copy_from_slice(&self.chunk_count.to_le_bytes());
        raw[20..28].copy_from_slice(&self.chunk_offset.to_le_bytes());
        raw[28..36].copy_from_slice(&self.signature_offset.to_le_bytes());
        raw
    }

    /// The chunk table must start right after the header and the trailer
    /// right after the table, since the file is read front to back.
    fn validate_layout(&self) -> Result<()> {
        if self.header_size as usize != HEADER_LEN {
            return Err(Error::InconsistentLayout(format!(
                "header size {} (expected {})",
                self.header_size, HEADER_LEN
            )));
        }
        if self.chunk_offset != u64::from(self.header_size) {
            return Err(Error::InconsistentLayout(format!(
                "chunk table at {} (expected {})",
                self.chunk_offset, self.header_size
            )));
        }
        let table_end = self
            .chunk_count
            .checked_mul(CHUNK_LEN as u64)
            .and_then(|len| len.checked_add(self.chunk_offset))
            .ok_or_else(|| {
                Error::InconsistentLayout(format!("chunk count {} overflows", self.chunk_count))
            })?;
        if self.signature_offset != table_end {
            return Err(Error::InconsistentLayout(format!(
                "signature at {} (expected {} for {} chunks)",
                self.signature_offset, table_end, self.chunk_count
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkDescriptor {
    pub size: u32,
    #[serde(serialize_with = "digest::serialize_hex")]
    pub hash: Sha256Digest,
}

impl ChunkDescriptor {
    pub fn decode(raw: &[u8; CHUNK_LEN]) -> Self {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&raw[4..]);
        Self {
            size: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            hash,
        }
    }

    pub fn encode(&self) -> [u8; CHUNK_LEN] {
        let mut raw = [0u8; CHUNK_LEN];
        raw[0..4].copy_from_slice(&self.size.to_le_bytes());
        raw[4..].copy_from_slice(&self.hash);
        raw
    }
}

/// Header and chunk table of one chunklist, plus the SHA-256 of exactly
/// those bytes (the payload the trailer vouches for).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub header: ManifestHeader,
    pub chunks: Vec<ChunkDescriptor>,
    #[serde(serialize_with = "digest::serialize_hex")]
    pub digest: Sha256Digest,
}

impl Manifest {
    /// Sum of all declared chunk sizes.
    pub fn image_len(&self) -> u64 {
        self.chunks.iter().map(|c| u64::from(c.size)).sum()
    }

    /// Header followed by the chunk table, byte for byte as digested.
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.chunks.len() * CHUNK_LEN);
        out.extend_from_slice(&self.header.encode());
        for chunk in &self.chunks {
            out.extend_from_slice(&chunk.encode());
        }
        out
    }
}

/// Read the header and chunk table from `source`, digesting every byte.
/// On return `source` is positioned at the trailer.
pub fn read_manifest<R: Read>(source: &mut R) -> Result<Manifest> {
    let mut acc = DigestAccumulator::new(source);

    let mut raw = [0u8; HEADER_LEN];
    acc.read_exact(&mut raw).map_err(Error::truncated("header"))?;
    let header = ManifestHeader::decode(&raw)?;
    debug!(
        version = header.file_version,
        chunk_method = header.chunk_method,
        signature_method = header.signature_method,
        chunks = header.chunk_count,
        "chunklist header"
    );

    // chunk_count is untrusted until the table has actually been read
    let mut chunks = Vec::with_capacity(header.chunk_count.min(4096) as usize);
    let mut raw = [0u8; CHUNK_LEN];
    for _ in 0..header.chunk_count {
        acc.read_exact(&mut raw).map_err(Error::truncated("chunk table"))?;
        chunks.push(ChunkDescriptor::decode(&raw));
    }

    let (digest, _) = acc.finish();
    Ok(Manifest {
        header,
        chunks,
        digest,
    })
}

/// A chunklist whose trailer has been checked.
#[derive(Debug, Clone, Serialize)]
pub struct Chunklist {
    pub manifest: Manifest,
    pub authentication: Authentication,
}

/// Parse a chunklist and check its trailer against `anchor`.
pub fn read_chunklist<R: Read>(source: &mut R, anchor: &TrustAnchor) -> Result<Chunklist> {
    let manifest = read_manifest(source)?;
    let authentication = signature::verify_trailer(&manifest, source, anchor)?;
    Ok(Chunklist {
        manifest,
        authentication,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifiedImage {
    pub chunks: usize,
    pub bytes: u64,
    pub authentication: Authentication,
}

/// Verify an image file against a chunklist file: trailer first, then
/// every chunk, then the exact end of the image.
pub fn verify_files(
    image: &Path,
    chunklist: &Path,
    anchor: &TrustAnchor,
    require_signature: bool,
    observer: &mut dyn ChunkObserver,
) -> Result<VerifiedImage> {
    info!("verifying {} with {}", image.display(), chunklist.display());

    let mut cnk = BufReader::new(File::open(chunklist)?);
    let list = read_chunklist(&mut cnk, anchor)?;
    list.authentication.enforce(require_signature)?;
    if list.authentication != Authentication::Signed {
        warn!("chunklist is {}, chunk hashes are not cryptographically anchored", list.authentication);
    }

    let dmg = BufReader::new(File::open(image)?);
    let bytes = verify_image(&list.manifest.chunks, dmg, observer)?;

    Ok(VerifiedImage {
        chunks: list.manifest.chunks.len(),
        bytes,
        authentication: list.authentication,
    })
}

fn le_u64(b: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(b);
    u64::from_le_bytes(raw)
}
