// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! The public filesystem surface.
//!
//! [`SquashFs`] owns the validated superblock, the byte source and the
//! shared block cache. Opening a file or directory hands out a handle
//! carrying its own reference to that state, so dropping or closing the
//! `SquashFs` value never invalidates handles already derived from it.

use std::sync::Arc;

use sqfs_storage::cache::{BlockCache, BlockDecoder};
use sqfs_storage::source::ImageSource;
use sqfs_utils::compress::{self, Compressor};

use crate::directory::{Dir, DirEntry};
use crate::error::{Error, Result};
use crate::file::File;
use crate::inode::Entry;
use crate::metadata::METADATA_BLOCK_SIZE;
use crate::resolve::resolve;
use crate::superblock::SuperMeta;

/// Default byte budget of the shared block cache: 16 MiB.
pub const DEFAULT_CACHE_SIZE: usize = 16 << 20;

/// Shared state behind every handle derived from one image.
pub(crate) struct Image {
    pub meta: SuperMeta,
    pub source: Box<dyn ImageSource>,
    pub cache: BlockCache,
}

/// Decompressor for one class of blocks, bounding output to the class's
/// maximum decompressed size.
pub(crate) struct BlockCodec {
    compressor: Compressor,
    max_size: usize,
}

impl BlockDecoder for BlockCodec {
    fn decode(&self, src: &[u8]) -> std::io::Result<Vec<u8>> {
        compress::decompress(src, self.max_size, self.compressor)
    }
}

impl Image {
    /// Decoder for 8 KiB metadata blocks.
    pub fn metadata_codec(&self) -> BlockCodec {
        BlockCodec {
            compressor: self.meta.compressor,
            max_size: METADATA_BLOCK_SIZE,
        }
    }

    /// Decoder for data and fragment blocks.
    pub fn data_codec(&self) -> BlockCodec {
        BlockCodec {
            compressor: self.meta.compressor,
            max_size: self.meta.block_size as usize,
        }
    }
}

/// A read-only SquashFS v4.0 image.
///
/// Cloning is cheap and shares the underlying source and cache.
#[derive(Clone)]
pub struct SquashFs {
    image: Arc<Image>,
}

impl SquashFs {
    /// Open `source` as a SquashFS image with the default cache budget.
    ///
    /// Only the superblock (and compressor options, when present) is read
    /// and validated here; tables are consumed on demand.
    pub fn open<S: ImageSource + 'static>(source: S) -> Result<SquashFs> {
        Self::open_with_cache_size(source, DEFAULT_CACHE_SIZE)
    }

    /// Open `source` with a custom block cache budget in bytes. A zero
    /// budget disables caching entirely.
    pub fn open_with_cache_size<S: ImageSource + 'static>(
        source: S,
        cache_bytes: usize,
    ) -> Result<SquashFs> {
        let meta = SuperMeta::load(&source)?;
        if !meta.compressor.is_supported() {
            return Err(Error::UnsupportedCompressor(meta.compressor));
        }

        debug!(
            "opened squashfs image: {} inodes, {} byte blocks, {} compression, export table: {}",
            meta.inode_count,
            meta.block_size,
            meta.compressor,
            meta.has_export_table()
        );

        Ok(SquashFs {
            image: Arc::new(Image {
                meta,
                source: Box::new(source),
                cache: BlockCache::new(cache_bytes),
            }),
        })
    }

    /// Stat `path`, following a symlink in the final position.
    pub fn stat(&self, path: &str) -> Result<Entry> {
        resolve(&self.image, path, true).map_err(|e| e.with_path("stat", path))
    }

    /// Stat `path` without following a symlink in the final position.
    pub fn lstat(&self, path: &str) -> Result<Entry> {
        resolve(&self.image, path, false).map_err(|e| e.with_path("lstat", path))
    }

    /// Open the regular file at `path` (following symlinks) for reading.
    pub fn open_file(&self, path: &str) -> Result<File> {
        let entry = resolve(&self.image, path, true)
            .and_then(|entry| {
                if entry.is_file() {
                    Ok(entry)
                } else {
                    Err(Error::Invalid)
                }
            })
            .map_err(|e| e.with_path("open", path))?;

        File::new(self.image.clone(), entry)
    }

    /// Open the directory at `path` (following symlinks) for enumeration.
    pub fn open_dir(&self, path: &str) -> Result<Dir> {
        let entry = resolve(&self.image, path, true)
            .and_then(|entry| {
                if entry.is_dir() {
                    Ok(entry)
                } else {
                    Err(Error::Invalid)
                }
            })
            .map_err(|e| e.with_path("open", path))?;

        Ok(Dir::new(self.image.clone(), entry))
    }

    /// Read the whole regular file at `path`.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let file = self.open_file(path)?;

        let mut buf = vec![0u8; file.stat().size() as usize];
        let mut done = 0;
        while done < buf.len() {
            let n = file
                .read_at(&mut buf[done..], done as u64)
                .map_err(|e| e.with_path("read", path))?;
            if n == 0 {
                return Err(Error::Invalid.with_path("read", path));
            }
            done += n;
        }

        Ok(buf)
    }

    /// List the directory at `path`. Entries come back in the listing's
    /// own order, which the format keeps sorted by name.
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let dir = self.open_dir(path)?;
        dir.read_dir(-1).map_err(|e| e.with_path("readdir", path))
    }

    /// Return the target of the symlink at `path`.
    pub fn read_link(&self, path: &str) -> Result<String> {
        resolve(&self.image, path, false)
            .and_then(|entry| {
                entry
                    .symlink_target()
                    .map(str::to_string)
                    .ok_or(Error::Invalid)
            })
            .map_err(|e| e.with_path("readlink", path))
    }
}
