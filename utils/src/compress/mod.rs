// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Decompression dispatch for the compressor ids a SquashFS superblock may
//! select.
//!
//! Every data block and metadata block in an image is compressed
//! independently with the single algorithm recorded in the superblock, so
//! the interface here is deliberately narrow: map a compressor id to a
//! `(compressed bytes) -> decompressed bytes` routine. Decompressed sizes
//! are bounded by the caller (8 KiB for metadata blocks, the image block
//! size for data blocks) and a result exceeding that bound is an error.

use std::fmt;
use std::io::{Read, Result};
use std::str::FromStr;

mod lz4_standard;
use self::lz4_standard::lz4_decompress;

/// Compressor ids as recorded in a SquashFS v4.0 superblock.
#[repr(u16)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Compressor {
    Gzip = 1,
    Lzma = 2,
    Lzo = 3,
    Xz = 4,
    Lz4 = 5,
    Zstd = 6,
}

impl fmt::Display for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Compressor::Gzip => "gzip",
            Compressor::Lzma => "lzma",
            Compressor::Lzo => "lzo",
            Compressor::Xz => "xz",
            Compressor::Lz4 => "lz4",
            Compressor::Zstd => "zstd",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Compressor {
    type Err = std::io::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "gzip" => Ok(Self::Gzip),
            "lzma" => Ok(Self::Lzma),
            "lzo" => Ok(Self::Lzo),
            "xz" => Ok(Self::Xz),
            "lz4" => Ok(Self::Lz4),
            "zstd" => Ok(Self::Zstd),
            _ => Err(einval!("unknown compressor name")),
        }
    }
}

impl TryFrom<u16> for Compressor {
    type Error = ();

    fn try_from(value: u16) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Compressor::Gzip),
            2 => Ok(Compressor::Lzma),
            3 => Ok(Compressor::Lzo),
            4 => Ok(Compressor::Xz),
            5 => Ok(Compressor::Lz4),
            6 => Ok(Compressor::Zstd),
            _ => Err(()),
        }
    }
}

impl Compressor {
    /// Whether a decompression routine is available for this id.
    ///
    /// LZO is recognized when parsing a superblock but no codec is wired
    /// in, so images using it can only be inspected, not read.
    pub fn is_supported(self) -> bool {
        !matches!(self, Compressor::Lzo)
    }
}

/// Decompress `src` with the given compressor, expecting at most
/// `max_size` bytes of output.
pub fn decompress(src: &[u8], max_size: usize, compressor: Compressor) -> Result<Vec<u8>> {
    match compressor {
        Compressor::Gzip => bounded_read(flate2::bufread::ZlibDecoder::new(src), max_size),
        Compressor::Lzma => {
            let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX)
                .map_err(|e| eio!(format!("failed to create lzma decoder: {}", e)))?;
            bounded_read(xz2::bufread::XzDecoder::new_stream(src, stream), max_size)
        }
        Compressor::Xz => bounded_read(xz2::bufread::XzDecoder::new(src), max_size),
        Compressor::Lz4 => lz4_decompress(src, max_size),
        Compressor::Zstd => zstd::bulk::decompress(src, max_size),
        Compressor::Lzo => Err(einval!("lzo decompression is not available")),
    }
}

fn bounded_read<R: Read>(r: R, max_size: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let n = r.take(max_size as u64 + 1).read_to_end(&mut buf)?;
    if n > max_size {
        return Err(einval!("decompressed block exceeds its size bound"));
    }
    Ok(buf)
}
