// src/chunklist/signature.rs - chunklist trailer verification
// Trust is anchored in exactly one RSA-2048 public key (e = 65537) and one
// padding layout; there is no key selection and no certificate chain.

use std::fmt;
use std::io::Read;

use lazy_static::lazy_static;
use num_bigint_dig::BigUint;
use serde::Serialize;
use tracing::debug;

use super::digest::Sha256Digest;
use super::Manifest;
use crate::error::{Error, Result};

pub const PUBLIC_EXPONENT: u32 = 65537;
pub const SIGNATURE_LEN: usize = 256;
pub const DIGEST_LEN: usize = 32;

/// DER DigestInfo prefix for SHA-256 (RFC 8017, 9.2 note 1).
const SHA256_DIGEST_INFO: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
    0x05, 0x00, 0x04, 0x20,
];

/// Apple EFI ROM public key 1, big-endian modulus.
const EFI_ROM_MODULUS: [u8; SIGNATURE_LEN] = [
    0xc3, 0xe7, 0x48, 0xca, 0xd9, 0xcd, 0x38, 0x43, 0x29, 0xe1, 0x0e, 0x25,
    0xa9, 0x1e, 0x43, 0xe1, 0xa7, 0x62, 0xff, 0x52, 0x9a, 0xde, 0x57, 0x8c,
    0x93, 0x5b, 0xdd, 0xf9, 0xb1, 0x3f, 0x21, 0x79, 0xd4, 0x85, 0x5e, 0x6f,
    0xc8, 0x9e, 0x9e, 0x29, 0xca, 0x12, 0x51, 0x7d, 0x17, 0xdf, 0xa1, 0xed,
    0xce, 0x0b, 0xeb, 0xf0, 0xea, 0x7b, 0x46, 0x1f, 0xfe, 0x61, 0xd9, 0x4e,
    0x2b, 0xdf, 0x72, 0xc1, 0x96, 0xf8, 0x9a, 0xcd, 0x35, 0x36, 0xb6, 0x44,
    0x06, 0x40, 0x14, 0xda, 0xe2, 0x5a, 0x15, 0xdb, 0x6b, 0xb0, 0x85, 0x2e,
    0xcb, 0xd1, 0x20, 0x91, 0x63, 0x18, 0xd1, 0xcc, 0xde, 0xa3, 0xc8, 0x4c,
    0x92, 0xed, 0x74, 0x3f, 0xc1, 0x76, 0xd0, 0xba, 0xca, 0x92, 0x0d, 0x3f,
    0xcf, 0x31, 0x58, 0xaf, 0xf7, 0x31, 0xf8, 0x8c, 0xe0, 0x62, 0x31, 0x82,
    0xa8, 0xed, 0x67, 0xe6, 0x50, 0x51, 0x5f, 0x75, 0x74, 0x59, 0x09, 0xf0,
    0x7d, 0x41, 0x5f, 0x55, 0xfc, 0x15, 0xa3, 0x56, 0x54, 0xd1, 0x18, 0xc5,
    0x5a, 0x46, 0x2d, 0x37, 0xa3, 0xac, 0xda, 0x08, 0x61, 0x2f, 0x3f, 0x3f,
    0x65, 0x71, 0x76, 0x1e, 0xfc, 0xcb, 0xcc, 0x29, 0x9a, 0xee, 0x99, 0xb3,
    0xa4, 0xfd, 0x62, 0x12, 0xcc, 0xff, 0xf5, 0xef, 0x37, 0xa2, 0xc3, 0x34,
    0xe8, 0x71, 0x19, 0x1f, 0x7e, 0x1c, 0x31, 0x96, 0x0e, 0x01, 0x0a, 0x54,
    0xe8, 0x6f, 0xa3, 0xf6, 0x2e, 0x6d, 0x69, 0x05, 0xe1, 0xcd, 0x57, 0x73,
    0x24, 0x10, 0xa3, 0xeb, 0x0c, 0x6b, 0x4d, 0xef, 0xda, 0xbe, 0x9f, 0x59,
    0xbf, 0x16, 0x18, 0x75, 0x8c, 0x75, 0x1c, 0xd5, 0x6c, 0xef, 0x85, 0x1d,
    0x1c, 0x0e, 0xaa, 0x1c, 0x55, 0x8e, 0x37, 0xac, 0x10, 0x8d, 0xa9, 0x08,
    0x98, 0x63, 0xd2, 0x0e, 0x2e, 0x7e, 0x4b, 0xf4, 0x75, 0xec, 0x66, 0xfe,
    0x6b, 0x3e, 0xfd, 0xcf,
];

lazy_static! {
    /// Process-wide anchor every signed chunklist is checked against.
    pub static ref EFI_ROM_KEY: TrustAnchor = TrustAnchor::new(&EFI_ROM_MODULUS);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureMethod {
    Unsigned = 0,
    Rsa2048 = 1,
    Digest = 2,
}

impl TryFrom<u8> for SignatureMethod {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(Self::Unsigned),
            1 => Ok(Self::Rsa2048),
            2 => Ok(Self::Digest),
            other => Err(Error::UnknownSignatureMethod(other)),
        }
    }
}

/// How far a chunklist could be trusted. Only `Signed` is cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Authentication {
    Signed,
    DigestOnly,
    Unauthenticated,
}

impl Authentication {
    /// Refuse anything below `Signed` when a signature is required.
    pub fn enforce(self, require_signed: bool) -> Result<Self> {
        if require_signed && self != Authentication::Signed {
            return Err(Error::Untrusted(self));
        }
        Ok(self)
    }
}

impl fmt::Display for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Authentication::Signed => "signed",
            Authentication::DigestOnly => "digest-only",
            Authentication::Unauthenticated => "unsigned",
        })
    }
}

/// RSA public key plus the fixed expected-plaintext template.
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    modulus: BigUint,
    exponent: BigUint,
    template: BigUint,
}

impl TrustAnchor {
    pub fn new(modulus_be: &[u8; SIGNATURE_LEN]) -> Self {
        Self {
            modulus: BigUint::from_bytes_be(modulus_be),
            exponent: BigUint::from(PUBLIC_EXPONENT),
            template: BigUint::from_bytes_be(&padding_template()),
        }
    }

    pub fn modulus_bits(&self) -> usize {
        self.modulus.bits()
    }

    /// Template with the digest OR-ed into its zero-filled low slot.
    pub fn expected_plaintext(&self, digest: &Sha256Digest) -> BigUint {
        self.template.clone() | &BigUint::from_bytes_be(digest)
    }

    /// `signature` is stored least-significant byte first.
    pub fn verify(&self, signature: &[u8; SIGNATURE_LEN], digest: &Sha256Digest) -> Result<()> {
        let recovered = BigUint::from_bytes_le(signature).modpow(&self.exponent, &self.modulus);
        if recovered == self.expected_plaintext(digest) {
            Ok(())
        } else {
            Err(Error::InvalidSignature)
        }
    }
}

/// `00 01 ff..ff 00 || DigestInfo || 00 x DIGEST_LEN`, sized to the key.
/// The low DIGEST_LEN bytes must stay zero for the OR in
/// `expected_plaintext` to equal substitution.
fn padding_template() -> [u8; SIGNATURE_LEN] {
    let info_at = SIGNATURE_LEN - DIGEST_LEN - SHA256_DIGEST_INFO.len();
    let mut t = [0u8; SIGNATURE_LEN];
    t[1] = 0x01;
    t[2..info_at - 1].fill(0xff);
    t[info_at..SIGNATURE_LEN - DIGEST_LEN].copy_from_slice(&SHA256_DIGEST_INFO);
    t
}

/// Read and check the trailer that follows the chunk table.
pub fn verify_trailer<R: Read>(
    manifest: &Manifest,
    trailer: &mut R,
    anchor: &TrustAnchor,
) -> Result<Authentication> {
    match SignatureMethod::try_from(manifest.header.signature_method)? {
        SignatureMethod::Unsigned => Ok(Authentication::Unauthenticated),
        SignatureMethod::Rsa2048 => {
            let mut signature = [0u8; SIGNATURE_LEN];
            trailer
                .read_exact(&mut signature)
                .map_err(Error::truncated("signature"))?;
            anchor.verify(&signature, &manifest.digest)?;
            debug!("chunklist signature verified");
            Ok(Authentication::Signed)
        }
        SignatureMethod::Digest => {
            let mut stored = [0u8; DIGEST_LEN];
            trailer
                .read_exact(&mut stored)
                .map_err(Error::truncated("digest"))?;
            if stored != manifest.digest {
                return Err(Error::DigestMismatch);
            }
            Ok(Authentication::DigestOnly)
        }
    }
}
