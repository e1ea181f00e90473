// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Error codes for the SquashFS reader.
//!
//! Format errors mean the image itself is not a valid v4.0 SquashFS; a
//! caller seeing one should treat the image as corrupt and stop reading.
//! Filesystem errors describe the outcome of an individual operation on a
//! valid image. I/O errors from the byte source or a decompressor are
//! propagated verbatim inside `Io`.

use std::io;

use sqfs_utils::compress::Compressor;

/// Error code for all image parsing and filesystem operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Format errors: the image is not a valid v4.0 SquashFS.
    #[error("invalid magic number")]
    InvalidMagicNumber,
    #[error("invalid version")]
    InvalidVersion,
    #[error("invalid block size")]
    InvalidBlockSize,
    #[error("invalid or unknown compressor")]
    InvalidCompressor,
    #[error("invalid compression level")]
    InvalidCompressionLevel,
    #[error("invalid window size")]
    InvalidWindowSize,
    #[error("invalid compression strategies")]
    InvalidCompressionStrategies,
    #[error("invalid compression algorithm")]
    InvalidCompressionAlgorithm,
    #[error("invalid dictionary size")]
    InvalidDictionarySize,
    #[error("invalid filters")]
    InvalidFilters,
    #[error("invalid compressor version")]
    InvalidCompressorVersion,
    #[error("invalid compressor flags")]
    InvalidCompressorFlags,
    #[error("no compressor options should be supplied")]
    NoCompressorOptions,
    #[error("unsupported compressor {0}")]
    UnsupportedCompressor(Compressor),
    #[error("invalid metadata pointer")]
    InvalidPointer,
    #[error("invalid block header")]
    InvalidBlockHeader,

    // Filesystem errors.
    #[error("entry does not exist")]
    NotFound,
    #[error("invalid argument")]
    Invalid,
    #[error("handle is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),

    /// A filesystem-style operation annotated with the operation name and
    /// the offending path. The underlying cause is preserved for matching.
    #[error("{op} {path}: {source}")]
    Path {
        op: &'static str,
        path: String,
        #[source]
        source: Box<Error>,
    },
}

/// Specialized `Result` for SquashFS operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Attach an operation name and path, turning an internal error into a
    /// filesystem-style one. Never nests: rewrapping replaces the context.
    pub(crate) fn with_path(self, op: &'static str, path: &str) -> Self {
        let source = match self {
            Error::Path { source, .. } => source,
            other => Box::new(other),
        };
        Error::Path {
            op,
            path: path.to_string(),
            source,
        }
    }

    /// The error with any path annotation stripped.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Path { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether this error means the looked-up path does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), Error::NotFound)
    }

    /// Whether this error came from an operation on a closed handle.
    pub fn is_closed(&self) -> bool {
        matches!(self.root_cause(), Error::Closed)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io) => io,
            Error::NotFound => io::Error::new(io::ErrorKind::NotFound, e),
            Error::Invalid | Error::Closed => io::Error::new(io::ErrorKind::InvalidInput, e),
            _ => io::Error::new(io::ErrorKind::InvalidData, e),
        }
    }
}
