// src/chunklist/digest.rs - running SHA-256 over everything read

use std::io::{self, Read};

use serde::Serializer;
use sha2::{Digest, Sha256};

pub type Sha256Digest = [u8; 32];

/// Reader adapter that feeds every byte it hands out into one SHA-256,
/// in read order. Bytes the caller never reads are never hashed.
pub struct DigestAccumulator<R> {
    inner: R,
    hasher: Sha256,
    consumed: u64,
}

impl<R: Read> DigestAccumulator<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            consumed: 0,
        }
    }

    /// Bytes digested so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Close the digest and give the underlying reader back.
    pub fn finish(self) -> (Sha256Digest, R) {
        (self.hasher.finalize().into(), self.inner)
    }
}

impl<R: Read> Read for DigestAccumulator<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.consumed += n as u64;
        Ok(n)
    }
}

pub fn to_hex(digest: &Sha256Digest) -> String {
    hex::encode(digest)
}

pub(crate) fn serialize_hex<S: Serializer>(digest: &Sha256Digest, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&to_hex(digest))
}
