// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Metadata streams.
//!
//! Inodes, directory listings, fragment descriptors and ID-table entries
//! all live inside chains of independently compressed 8 KiB metadata
//! blocks. A [`MetadataStream`] presents one such chain as a flat byte
//! sequence: each on-disk block starts with a 2-byte header carrying the
//! stored size and an uncompressed flag, and reading past the current
//! block transparently loads the next one. Streams have no intrinsic
//! length; consumers bound their own reads (directory listings, for
//! instance, are bounded by the directory inode's size).
//!
//! Addresses into metadata are packed 48-bit pointers: the upper 32 bits
//! locate a block relative to a table base, the lower 16 bits index into
//! that block's decompressed bytes.

use std::sync::Arc;

use sqfs_storage::cache::BlockDecoder;

use crate::error::{Error, Result};
use crate::fs::Image;

/// Decompressed size of a metadata block.
pub(crate) const METADATA_BLOCK_SIZE: usize = 8192;
/// Bits of a metadata pointer holding the in-block byte offset.
pub(crate) const POINTER_SHIFT: u64 = 16;

const POINTER_OFFSET_MASK: u64 = 0xffff;
const HEADER_SIZE: u64 = 2;
const BLOCK_SIZE_MASK: u16 = 0x7fff;
const BLOCK_UNCOMPRESSED: u16 = 0x8000;

/// A readable byte sequence assembled from a chain of metadata blocks.
pub(crate) struct MetadataStream {
    image: Arc<Image>,
    /// On-disk offset of the next metadata block header.
    next: u64,
    block: Arc<Vec<u8>>,
    pos: usize,
}

impl MetadataStream {
    /// Open the stream named by `pointer` relative to the table at
    /// `table`: the block chain starts at `table + (pointer >> 16)` and
    /// reading starts `pointer & 0xffff` bytes into its first block.
    pub fn new(image: Arc<Image>, pointer: u64, table: u64) -> Result<MetadataStream> {
        let offset = (pointer & POINTER_OFFSET_MASK) as usize;
        if offset > METADATA_BLOCK_SIZE {
            return Err(Error::InvalidPointer);
        }

        let mut stream = MetadataStream {
            image,
            next: table + (pointer >> POINTER_SHIFT),
            block: Arc::new(Vec::new()),
            pos: 0,
        };
        stream.next_block()?;

        if offset > stream.block.len() {
            return Err(Error::InvalidPointer);
        }
        stream.pos = offset;

        Ok(stream)
    }

    /// Load the metadata block at `self.next` and reset the read position.
    fn next_block(&mut self) -> Result<()> {
        let mut header = [0u8; 2];
        self.image.source.read_exact_at(&mut header, self.next)?;
        let header = u16::from_le_bytes(header);

        let size = (header & BLOCK_SIZE_MASK) as usize;
        if size > METADATA_BLOCK_SIZE {
            return Err(Error::InvalidBlockHeader);
        }

        let mut raw = vec![0u8; size];
        self.image
            .source
            .read_exact_at(&mut raw, self.next + HEADER_SIZE)?;

        let codec;
        let decoder: Option<&dyn BlockDecoder> = if header & BLOCK_UNCOMPRESSED == 0 {
            codec = self.image.metadata_codec();
            Some(&codec)
        } else {
            None
        };
        self.block = self.image.cache.get(self.next, &raw, decoder)?;

        self.next += HEADER_SIZE + size as u64;
        self.pos = 0;

        Ok(())
    }

    /// Fill `buf` completely, chaining into following metadata blocks as
    /// needed. Failing to fetch the next block header surfaces as the
    /// underlying I/O error; that is the only end-of-stream signal.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            if self.pos >= self.block.len() {
                self.next_block()?;
                continue;
            }
            let n = (buf.len() - done).min(self.block.len() - self.pos);
            buf[done..done + n].copy_from_slice(&self.block[self.pos..self.pos + n]);
            self.pos += n;
            done += n;
        }
        Ok(())
    }

    /// Skip forward `count` bytes within the current metadata block.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        if self.pos + count > self.block.len() {
            return Err(Error::InvalidPointer);
        }
        self.pos += count;
        Ok(())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(i16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; count];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Open the metadata stream holding entry `index` of the lookup table at
/// `table`: a sparse top level of absolute block addresses, eight bytes
/// each covering 1024 entries, over streams of fixed-size entries of
/// `1 << entry_log2` bytes.
///
/// Both the ID table (4-byte entries) and the fragment table (16-byte
/// descriptors) share this layout.
pub(crate) fn lookup_table_stream(
    image: &Arc<Image>,
    table: u64,
    index: u64,
    entry_log2: u32,
) -> Result<MetadataStream> {
    let mut buf = [0u8; 8];
    image
        .source
        .read_exact_at(&mut buf, table + (index >> 10) * 8)?;
    let block = u64::from_le_bytes(buf);

    let mut stream = MetadataStream::new(image.clone(), 0, block)?;
    stream.skip(((index << entry_log2) % METADATA_BLOCK_SIZE as u64) as usize)?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::fs::test_utils::image_over;

    fn raw_metablock(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u16 | 0x8000).to_le_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_read_chains_across_blocks() {
        let mut bytes = raw_metablock(&[1u8; METADATA_BLOCK_SIZE]);
        bytes.extend(raw_metablock(&[2u8; 100]));
        let image = image_over(bytes, 128 << 10, 1 << 20);

        let mut stream = MetadataStream::new(image, 8190, 0).unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 1, 2, 2]);
    }

    #[test]
    fn test_compressed_block_via_cache() {
        let payload = vec![7u8; 4096];
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut bytes = (compressed.len() as u16).to_le_bytes().to_vec();
        bytes.extend_from_slice(&compressed);
        let image = image_over(bytes, 128 << 10, 1 << 20);

        // Two streams over the same block; the second hits the cache.
        for _ in 0..2 {
            let mut stream = MetadataStream::new(image.clone(), 0, 0).unwrap();
            let mut buf = vec![0u8; payload.len()];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(buf, payload);
        }
    }

    #[test]
    fn test_rejects_wide_pointer_offset() {
        let image = image_over(raw_metablock(&[0u8; 16]), 128 << 10, 0);
        assert!(matches!(
            MetadataStream::new(image, 8193, 0),
            Err(Error::InvalidPointer)
        ));
    }

    #[test]
    fn test_rejects_oversized_block() {
        let image = image_over(0xa001u16.to_le_bytes().to_vec(), 128 << 10, 0);
        assert!(matches!(
            MetadataStream::new(image, 0, 0),
            Err(Error::InvalidBlockHeader)
        ));
    }

    #[test]
    fn test_skip_stays_in_block() {
        let image = image_over(raw_metablock(&[9u8; 64]), 128 << 10, 0);
        let mut stream = MetadataStream::new(image, 0, 0).unwrap();

        stream.skip(60).unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [9; 4]);

        assert!(matches!(stream.skip(1), Err(Error::InvalidPointer)));
    }

    #[test]
    fn test_lookup_table_entry() {
        let mut payload = Vec::new();
        for i in 0..16u32 {
            payload.extend_from_slice(&(i * 10).to_le_bytes());
        }
        let mut bytes = raw_metablock(&payload);
        let table = bytes.len() as u64;
        bytes.extend_from_slice(&0u64.to_le_bytes()); // entries live at offset 0

        let image = image_over(bytes, 128 << 10, 0);
        let mut stream = lookup_table_stream(&image, table, 5, 2).unwrap();
        assert_eq!(stream.read_u32().unwrap(), 50);
    }

    #[test]
    fn test_end_of_stream_is_io_error() {
        let image = image_over(raw_metablock(&[3u8; 4]), 128 << 10, 0);
        let mut stream = MetadataStream::new(image, 0, 0).unwrap();

        let mut buf = [0u8; 8];
        assert!(matches!(
            stream.read_exact(&mut buf),
            Err(Error::Io(_))
        ));
    }
}
