// src/error.rs - recoveryctl error taxonomy

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::chunklist::signature::Authentication;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    // chunklist format
    #[error("invalid chunklist magic {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("truncated chunklist: {0} ended early")]
    TruncatedManifest(&'static str),

    #[error("inconsistent chunklist layout: {0}")]
    InconsistentLayout(String),

    #[error("unrecognized chunklist signature method {0}")]
    UnknownSignatureMethod(u8),

    // trust
    #[error("invalid signature")]
    InvalidSignature,

    #[error("chunklist missing digital signature")]
    DigestMismatch,

    #[error("chunklist is {0}, refusing to trust it")]
    Untrusted(Authentication),

    // image content
    #[error("invalid chunk {index} size: expected {expected}, read {read}")]
    ChunkSize { index: usize, expected: u32, read: u64 },

    #[error("invalid chunk {index}: hash mismatch")]
    ChunkHash { index: usize },

    #[error("invalid image: larger than chunklist")]
    ImageTooLarge,

    // recovery service
    #[error("no session in headers")]
    NoSession,

    #[error("missing key {0}")]
    MissingInfoKey(&'static str),

    // user input
    #[error("cannot use MLBs in non 17 character format: '{0}'")]
    InvalidMlb(String),

    #[error("invalid EEEE code length: '{0}'")]
    InvalidEeee(String),

    #[error("invalid save path {0}")]
    InvalidSavePath(String),

    #[error("invalid url {0}")]
    InvalidUrl(String),

    #[error("unknown recoveryOS release '{0}'")]
    UnknownRelease(String),

    #[error("board database {0} lists no boards")]
    EmptyBoardDatabase(PathBuf),

    // ambient
    #[error("config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("board database {path}: {source}")]
    BoardDatabase {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} not found, install QEMU first (https://www.qemu.org/download/)")]
    ConverterMissing(PathBuf),

    #[error("conversion failed: {0}")]
    ConversionFailed(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Map an `UnexpectedEof` while reading `what` to a truncation error.
    pub(crate) fn truncated(what: &'static str) -> impl Fn(io::Error) -> Error {
        move |e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::TruncatedManifest(what)
            } else {
                Error::Io(e)
            }
        }
    }
}
