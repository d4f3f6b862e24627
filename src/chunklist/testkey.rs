// src/chunklist/testkey.rs - throwaway RSA-2048 key and chunklist builder for tests

use num_bigint_dig::BigUint;
use sha2::{Digest, Sha256};

use super::signature::{SignatureMethod, TrustAnchor, SIGNATURE_LEN};
use super::{ChunkDescriptor, ManifestHeader, Sha256Digest, CHUNK_LEN, HEADER_LEN, MAGIC};

const TEST_MODULUS: [u8; SIGNATURE_LEN] = [
    0xca, 0x10, 0x69, 0x2e, 0x1a, 0x5c, 0x5c, 0x5a, 0x2b, 0x98, 0xb5, 0xd0,
    0xea, 0x1b, 0x9d, 0xc5, 0xb6, 0x6c, 0x3b, 0x6b, 0x90, 0x16, 0xe0, 0x46,
    0x0a, 0x6a, 0x6a, 0x77, 0xac, 0xf4, 0xca, 0x31, 0x8c, 0x81, 0xa9, 0x43,
    0xe6, 0x1d, 0x47, 0x18, 0xb4, 0x67, 0xeb, 0x20, 0x7a, 0xcc, 0x3d, 0xcf,
    0x61, 0xe5, 0xd8, 0x0d, 0x2a, 0xd5, 0x1d, 0x6d, 0x40, 0x7b, 0x26, 0xba,
    0x9a, 0xc4, 0x0d, 0x75, 0xf9, 0x02, 0xa3, 0xe7, 0xa8, 0x4e, 0xaf, 0x2f,
    0xa7, 0xad, 0x9c, 0x7e, 0x90, 0x80, 0x35, 0x1f, 0x7e, 0x43, 0xd3, 0x8e,
    0x1c, 0x8b, 0xe8, 0x7d, 0xe3, 0x04, 0xa1, 0xc5, 0xe1, 0x2e, 0xe7, 0x5a,
    0x04, 0xf6, 0x23, 0xa6, 0x2c, 0xa2, 0x78, 0x2e, 0x46, 0xae, 0x3a, 0xdb,
    0xf0, 0xaa, 0x09, 0x5c, 0x5e, 0xf2, 0x98, 0x69, 0x6c, 0x4b, 0xfb, 0x7b,
    0x1f, 0xd1, 0xce, 0xeb, 0xb8, 0xcb, 0xe6, 0xaa, 0x6e, 0xe9, 0x27, 0x56,
    0x6c, 0x40, 0xf6, 0x1b, 0xe4, 0x0c, 0xa6, 0xf6, 0x0d, 0xc3, 0x13, 0x90,
    0xa0, 0xd5, 0x37, 0xf1, 0x25, 0x7e, 0x36, 0x97, 0x67, 0x18, 0xf3, 0xce,
    0x23, 0xdc, 0xbc, 0xc8, 0x02, 0x1a, 0x6e, 0x9d, 0x98, 0xdd, 0x4a, 0xd1,
    0x15, 0xb1, 0x62, 0xec, 0x5e, 0xdf, 0x2d, 0x5e, 0xca, 0xea, 0x2f, 0x34,
    0x16, 0xee, 0x38, 0xc0, 0x08, 0x7e, 0x35, 0xdd, 0x92, 0xf2, 0xeb, 0x7c,
    0x77, 0x5f, 0xaa, 0x97, 0x9e, 0x21, 0x8f, 0xa6, 0x43, 0xfa, 0xa2, 0x92,
    0xde, 0xfb, 0xc6, 0x13, 0xdb, 0x7c, 0x64, 0x52, 0x05, 0xb1, 0x22, 0x63,
    0x3d, 0xfd, 0x08, 0x7e, 0xb0, 0x4d, 0x02, 0x29, 0xfc, 0xde, 0x7c, 0xdb,
    0xbd, 0xce, 0x10, 0x4d, 0x5d, 0xea, 0xfd, 0x86, 0x30, 0x9c, 0xfb, 0xe5,
    0xef, 0xd2, 0xd0, 0xec, 0xde, 0xc2, 0x68, 0xc8, 0x8e, 0x4f, 0x00, 0x93,
    0x9b, 0xf3, 0xca, 0x5f,
];

const TEST_PRIVATE_EXPONENT: [u8; SIGNATURE_LEN] = [
    0x30, 0x34, 0xb8, 0x13, 0x12, 0xa0, 0xe4, 0x3b, 0x72, 0xd9, 0x2c, 0xcf,
    0x19, 0x7a, 0xdb, 0x29, 0xf6, 0xfa, 0x5d, 0x36, 0xad, 0x1a, 0x78, 0x08,
    0xdd, 0xa5, 0x43, 0x9f, 0x27, 0x79, 0x02, 0xdf, 0xcd, 0x48, 0x85, 0xac,
    0x38, 0x32, 0xd5, 0xea, 0x53, 0xe7, 0xd2, 0xd5, 0x5d, 0xd6, 0x6a, 0x0c,
    0x96, 0xab, 0x71, 0xde, 0xba, 0x50, 0x3b, 0x83, 0xfb, 0xf5, 0x25, 0x69,
    0x31, 0x51, 0x02, 0x71, 0x19, 0xa6, 0x02, 0x9a, 0x5a, 0xb1, 0xe2, 0xe3,
    0x78, 0x9a, 0x57, 0x92, 0x6e, 0x40, 0xd7, 0xeb, 0x9a, 0x80, 0xed, 0xf0,
    0xa2, 0x68, 0xd2, 0x5f, 0x6e, 0x10, 0x85, 0xd3, 0xa2, 0x84, 0x41, 0x17,
    0x5d, 0xc5, 0xa6, 0xfd, 0x96, 0xfa, 0x6f, 0xb7, 0x82, 0x8f, 0x40, 0x65,
    0x86, 0x45, 0xda, 0x93, 0xd9, 0xe7, 0x00, 0x6b, 0x6e, 0x35, 0xb6, 0x5a,
    0x4a, 0x5e, 0x10, 0x82, 0x76, 0x04, 0xd7, 0x13, 0x76, 0xf2, 0xc5, 0x65,
    0x92, 0xdf, 0x4a, 0xf0, 0x98, 0xd0, 0x6b, 0x17, 0xf6, 0xf6, 0x11, 0x19,
    0x84, 0x77, 0xe4, 0x5d, 0xa6, 0x73, 0x7f, 0xed, 0xa9, 0x56, 0x43, 0xe9,
    0x9f, 0x99, 0x8f, 0xc5, 0x59, 0xa7, 0x3c, 0x07, 0xb6, 0x9d, 0x25, 0xf0,
    0xe1, 0xae, 0x78, 0x86, 0xdc, 0xe6, 0x9b, 0x63, 0xd4, 0xd0, 0xec, 0xd4,
    0xd8, 0x50, 0xb2, 0xf1, 0xc6, 0xf3, 0xd1, 0x55, 0x2f, 0xf2, 0xff, 0x6f,
    0x32, 0x05, 0xdd, 0xac, 0x09, 0x71, 0x69, 0x95, 0xe0, 0xe3, 0x3d, 0x02,
    0x55, 0x3f, 0xed, 0x00, 0x71, 0xd0, 0x9d, 0x86, 0x36, 0x2e, 0xb7, 0xf7,
    0x1b, 0x8e, 0x73, 0x57, 0x33, 0x98, 0xc6, 0x68, 0xf7, 0x7c, 0x38, 0x30,
    0x7e, 0x68, 0xbb, 0x8d, 0xb1, 0xee, 0xaa, 0xcf, 0x97, 0xe5, 0xb1, 0x78,
    0x43, 0x91, 0x50, 0x4a, 0x95, 0xf0, 0x3a, 0xea, 0x81, 0xdb, 0x27, 0xb1,
    0x53, 0xee, 0x96, 0xb9,
];

pub(crate) fn test_anchor() -> TrustAnchor {
    TrustAnchor::new(&TEST_MODULUS)
}

/// Raw RSA over the expected plaintext, stored least-significant byte first.
pub(crate) fn sign(digest: &Sha256Digest) -> [u8; SIGNATURE_LEN] {
    let m = test_anchor().expected_plaintext(digest);
    let d = BigUint::from_bytes_be(&TEST_PRIVATE_EXPONENT);
    let n = BigUint::from_bytes_be(&TEST_MODULUS);
    let le = m.modpow(&d, &n).to_bytes_le();
    let mut out = [0u8; SIGNATURE_LEN];
    out[..le.len()].copy_from_slice(&le);
    out
}

pub(crate) fn header_for(chunk_count: u64, signature_method: u8) -> ManifestHeader {
    ManifestHeader {
        magic: *MAGIC,
        header_size: HEADER_LEN as u32,
        file_version: 1,
        chunk_method: 1,
        signature_method,
        reserved: 0,
        chunk_count,
        chunk_offset: HEADER_LEN as u64,
        signature_offset: (HEADER_LEN + CHUNK_LEN * chunk_count as usize) as u64,
    }
}

/// Full chunklist file with the requested trailer.
pub(crate) fn build_chunklist(chunks: &[ChunkDescriptor], method: SignatureMethod) -> Vec<u8> {
    let mut out = header_for(chunks.len() as u64, method as u8).encode().to_vec();
    for chunk in chunks {
        out.extend_from_slice(&chunk.encode());
    }
    let digest: Sha256Digest = Sha256::digest(&out).into();
    match method {
        SignatureMethod::Unsigned => {}
        SignatureMethod::Rsa2048 => out.extend_from_slice(&sign(&digest)),
        SignatureMethod::Digest => out.extend_from_slice(&digest),
    }
    out
}

/// Chunk descriptors for `image` cut at `sizes`.
pub(crate) fn describe(image: &[u8], sizes: &[u32]) -> Vec<ChunkDescriptor> {
    let mut at = 0usize;
    sizes
        .iter()
        .map(|&size| {
            let part = &image[at..at + size as usize];
            at += size as usize;
            ChunkDescriptor {
                size,
                hash: Sha256::digest(part).into(),
            }
        })
        .collect()
}
