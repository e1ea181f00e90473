// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! SquashFS v4.0 superblock parsing.
//!
//! The superblock is a 96-byte little-endian header at offset zero. It
//! carries the object counts, the data block size, the compressor id and
//! the absolute offsets of every table in the image; everything else is
//! reached from here. When flag `0x400` is set, a small compressor-options
//! record follows the header and is validated per compressor.

use std::mem::size_of;

use serde::Serializer;
use sqfs_storage::source::ImageSource;
use sqfs_utils::compress::Compressor;

use crate::error::{Error, Result};

/// "hsqs" in little-endian byte order.
pub const SQUASHFS_MAGIC: u32 = 0x7371_7368;
/// Size in bytes of the on-disk superblock.
pub const SUPERBLOCK_SIZE: usize = 96;
/// Smallest valid data block size (4 KiB).
pub const MIN_BLOCK_SIZE: u32 = 1 << 12;
/// Largest valid data block size (1 MiB).
pub const MAX_BLOCK_SIZE: u32 = 1 << 20;
/// Table offset marking the table as absent.
pub const TABLE_ABSENT: u64 = u64::MAX;

const VERSION_MAJOR: u16 = 4;
const VERSION_MINOR: u16 = 0;

bitflags! {
    /// Superblock feature flags.
    #[derive(Default, Serialize)]
    pub struct SuperFlags: u16 {
        const INODES_UNCOMPRESSED = 0x0001;
        const DATA_UNCOMPRESSED = 0x0002;
        const UNUSED = 0x0004;
        const FRAGMENTS_UNCOMPRESSED = 0x0008;
        const FRAGMENTS_ABSENT = 0x0010;
        const FRAGMENTS_ALWAYS = 0x0020;
        const DUPLICATES_REMOVED = 0x0040;
        const EXPORT_TABLE_PRESENT = 0x0080;
        const XATTRS_UNCOMPRESSED = 0x0100;
        const XATTRS_ABSENT = 0x0200;
        const COMPRESSOR_OPTIONS_PRESENT = 0x0400;
        const IDS_UNCOMPRESSED = 0x0800;
    }
}

macro_rules! impl_ondisk_converter {
    ($T: ty) => {
        impl TryFrom<&[u8]> for &$T {
            type Error = Error;

            fn try_from(buf: &[u8]) -> std::result::Result<Self, Self::Error> {
                let ptr = buf.as_ptr();
                if buf.len() != size_of::<$T>()
                    || ptr as usize & (std::mem::align_of::<$T>() - 1) != 0
                {
                    return Err(Error::Invalid);
                }

                Ok(unsafe { &*(ptr as *const $T) })
            }
        }

        impl AsRef<[u8]> for $T {
            #[inline]
            fn as_ref(&self) -> &[u8] {
                let ptr = self as *const $T as *const u8;
                unsafe { std::slice::from_raw_parts(ptr, size_of::<$T>()) }
            }
        }

        impl AsMut<[u8]> for $T {
            #[inline]
            fn as_mut(&mut self) -> &mut [u8] {
                let ptr = self as *mut $T as *mut u8;
                unsafe { std::slice::from_raw_parts_mut(ptr, size_of::<$T>()) }
            }
        }
    };
}

macro_rules! impl_ondisk_getter {
    ($G: ident, $F: ident, $U: ty) => {
        #[inline]
        pub(crate) fn $G(&self) -> $U {
            <$U>::from_le(self.$F)
        }
    };
}

/// SquashFS superblock on-disk layout, 96 bytes.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub(crate) struct OndiskSuperblock {
    s_magic: u32,
    s_inode_count: u32,
    s_mod_time: u32,
    s_block_size: u32,
    s_frag_count: u32,
    s_compressor: u16,
    s_block_log: u16,
    s_flags: u16,
    s_id_count: u16,
    s_version_major: u16,
    s_version_minor: u16,
    s_root_inode: u64,
    s_bytes_used: u64,
    s_id_table: u64,
    s_xattr_table: u64,
    s_inode_table: u64,
    s_dir_table: u64,
    s_frag_table: u64,
    s_export_table: u64,
}

impl_ondisk_converter!(OndiskSuperblock);

impl OndiskSuperblock {
    impl_ondisk_getter!(magic, s_magic, u32);
    impl_ondisk_getter!(inode_count, s_inode_count, u32);
    impl_ondisk_getter!(mod_time, s_mod_time, u32);
    impl_ondisk_getter!(block_size, s_block_size, u32);
    impl_ondisk_getter!(frag_count, s_frag_count, u32);
    impl_ondisk_getter!(compressor, s_compressor, u16);
    impl_ondisk_getter!(block_log, s_block_log, u16);
    impl_ondisk_getter!(flags, s_flags, u16);
    impl_ondisk_getter!(id_count, s_id_count, u16);
    impl_ondisk_getter!(version_major, s_version_major, u16);
    impl_ondisk_getter!(version_minor, s_version_minor, u16);
    impl_ondisk_getter!(root_inode, s_root_inode, u64);
    impl_ondisk_getter!(bytes_used, s_bytes_used, u64);
    impl_ondisk_getter!(id_table, s_id_table, u64);
    impl_ondisk_getter!(xattr_table, s_xattr_table, u64);
    impl_ondisk_getter!(inode_table, s_inode_table, u64);
    impl_ondisk_getter!(dir_table, s_dir_table, u64);
    impl_ondisk_getter!(frag_table, s_frag_table, u64);
    impl_ondisk_getter!(export_table, s_export_table, u64);

    /// Read the superblock from offset zero of `source`.
    pub fn load(source: &dyn ImageSource) -> Result<Self> {
        let mut sb = OndiskSuperblock::default();
        source.read_exact_at(sb.as_mut(), 0)?;
        Ok(sb)
    }

    /// Check magic, version and block size coherence.
    pub fn validate(&self) -> Result<()> {
        if self.magic() != SQUASHFS_MAGIC {
            return Err(Error::InvalidMagicNumber);
        }
        if self.version_major() != VERSION_MAJOR || self.version_minor() != VERSION_MINOR {
            return Err(Error::InvalidVersion);
        }

        let block_size = self.block_size();
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size)
            || !block_size.is_power_of_two()
            || self.block_log() >= 32
            || 1u32 << self.block_log() != block_size
        {
            return Err(Error::InvalidBlockSize);
        }

        Ok(())
    }
}

/// Per-compressor tuning record, validated against the ranges the format
/// allows. Synthesized with defaults when the superblock carries none.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum CompressorOptions {
    Gzip {
        compression_level: u32,
        window_size: u32,
        strategies: u16,
    },
    Lzma,
    Lzo {
        algorithm: u32,
        level: u32,
    },
    Xz {
        dictionary_size: u32,
        filters: u32,
    },
    Lz4 {
        version: u32,
        flags: u32,
    },
    Zstd {
        compression_level: u32,
    },
}

impl CompressorOptions {
    /// Size in bytes of the on-disk options record for `compressor`.
    fn ondisk_size(compressor: Compressor) -> usize {
        match compressor {
            Compressor::Gzip => 10,
            Compressor::Lzma => 0,
            Compressor::Lzo => 8,
            Compressor::Xz => 8,
            Compressor::Lz4 => 8,
            Compressor::Zstd => 4,
        }
    }

    fn default_for(compressor: Compressor) -> CompressorOptions {
        match compressor {
            Compressor::Gzip => CompressorOptions::Gzip {
                compression_level: 9,
                window_size: 15,
                strategies: 0,
            },
            Compressor::Lzma => CompressorOptions::Lzma,
            Compressor::Lzo => CompressorOptions::Lzo {
                algorithm: 4,
                level: 8,
            },
            Compressor::Xz => CompressorOptions::Xz {
                dictionary_size: 8192,
                filters: 0,
            },
            Compressor::Lz4 => CompressorOptions::Lz4 {
                version: 1,
                flags: 0,
            },
            Compressor::Zstd => CompressorOptions::Zstd {
                compression_level: 22,
            },
        }
    }

    /// Parse and validate the record in `buf` for `compressor`.
    fn parse(compressor: Compressor, buf: &[u8]) -> Result<CompressorOptions> {
        let u32_at = |pos: usize| -> u32 {
            u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap())
        };
        let u16_at = |pos: usize| -> u16 {
            u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap())
        };

        let options = match compressor {
            Compressor::Gzip => {
                let compression_level = u32_at(0);
                let window_size = u32_at(4);
                let strategies = u16_at(8);
                if !(1..=9).contains(&compression_level) {
                    return Err(Error::InvalidCompressionLevel);
                }
                if !(8..=15).contains(&window_size) {
                    return Err(Error::InvalidWindowSize);
                }
                if strategies > 31 {
                    return Err(Error::InvalidCompressionStrategies);
                }
                CompressorOptions::Gzip {
                    compression_level,
                    window_size,
                    strategies,
                }
            }
            Compressor::Lzma => return Err(Error::NoCompressorOptions),
            Compressor::Lzo => {
                let algorithm = u32_at(0);
                let level = u32_at(4);
                if algorithm > 4 {
                    return Err(Error::InvalidCompressionAlgorithm);
                }
                if level > 9 || (level != 0 && algorithm != 4) {
                    return Err(Error::InvalidCompressionLevel);
                }
                CompressorOptions::Lzo { algorithm, level }
            }
            Compressor::Xz => {
                let dictionary_size = u32_at(0);
                let filters = u32_at(4);
                let bits = dictionary_size.count_ones();
                if dictionary_size < 8192 || bits == 0 || bits > 2 {
                    return Err(Error::InvalidDictionarySize);
                }
                if filters > 63 {
                    return Err(Error::InvalidFilters);
                }
                CompressorOptions::Xz {
                    dictionary_size,
                    filters,
                }
            }
            Compressor::Lz4 => {
                let version = u32_at(0);
                let flags = u32_at(4);
                if version != 1 {
                    return Err(Error::InvalidCompressorVersion);
                }
                if flags > 1 {
                    return Err(Error::InvalidCompressorFlags);
                }
                CompressorOptions::Lz4 { version, flags }
            }
            Compressor::Zstd => {
                let compression_level = u32_at(0);
                if !(1..=22).contains(&compression_level) {
                    return Err(Error::InvalidCompressionLevel);
                }
                CompressorOptions::Zstd { compression_level }
            }
        };

        Ok(options)
    }

    /// Load the options record following the superblock, or synthesize the
    /// compressor's defaults when the superblock carries none.
    fn load(
        source: &dyn ImageSource,
        compressor: Compressor,
        present: bool,
    ) -> Result<CompressorOptions> {
        if !present {
            return Ok(Self::default_for(compressor));
        }
        if compressor == Compressor::Lzma {
            return Err(Error::NoCompressorOptions);
        }

        let mut buf = [0u8; 10];
        let len = Self::ondisk_size(compressor);
        source.read_exact_at(&mut buf[..len], SUPERBLOCK_SIZE as u64)?;

        Self::parse(compressor, &buf[..len])
    }
}

/// Superblock contents in runtime form, validated at load.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SuperMeta {
    pub inode_count: u32,
    pub mod_time: u32,
    pub block_size: u32,
    pub frag_count: u32,
    pub compressor: Compressor,
    pub options: CompressorOptions,
    pub flags: SuperFlags,
    pub id_count: u16,
    pub bytes_used: u64,
    pub root_inode: u64,
    pub id_table: u64,
    pub xattr_table: u64,
    pub inode_table: u64,
    pub dir_table: u64,
    pub frag_table: u64,
    pub export_table: u64,
}

impl SuperMeta {
    /// Parse and validate the superblock and any compressor options.
    pub fn load(source: &dyn ImageSource) -> Result<SuperMeta> {
        let sb = OndiskSuperblock::load(source)?;
        sb.validate()?;

        let compressor =
            Compressor::try_from(sb.compressor()).map_err(|_| Error::InvalidCompressor)?;
        let flags = SuperFlags::from_bits_truncate(sb.flags());
        let options = CompressorOptions::load(
            source,
            compressor,
            flags.contains(SuperFlags::COMPRESSOR_OPTIONS_PRESENT),
        )?;

        trace!(
            "superblock: {} inodes, block size {}, compressor {}, flags {:?}",
            sb.inode_count(),
            sb.block_size(),
            compressor,
            flags
        );

        Ok(SuperMeta {
            inode_count: sb.inode_count(),
            mod_time: sb.mod_time(),
            block_size: sb.block_size(),
            frag_count: sb.frag_count(),
            compressor,
            options,
            flags,
            id_count: sb.id_count(),
            bytes_used: sb.bytes_used(),
            root_inode: sb.root_inode(),
            id_table: sb.id_table(),
            xattr_table: sb.xattr_table(),
            inode_table: sb.inode_table(),
            dir_table: sb.dir_table(),
            frag_table: sb.frag_table(),
            export_table: sb.export_table(),
        })
    }

    /// Whether the image carries an NFS export table. The table is only
    /// ever detected, never traversed.
    pub fn has_export_table(&self) -> bool {
        self.flags.contains(SuperFlags::EXPORT_TABLE_PRESENT) && self.export_table != TABLE_ABSENT
    }
}

fn serialize_compressor<S: Serializer>(c: &Compressor, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&c.to_string())
}

/// Basic data about a SquashFS image, read from the superblock alone.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Stats {
    /// Number of inodes in the image.
    pub inodes: u32,
    /// Image creation time, seconds since the Unix epoch.
    pub mod_time: u32,
    /// Data block size in bytes.
    pub block_size: u32,
    /// Number of fragment blocks.
    pub frag_count: u32,
    /// Compression algorithm applied to blocks.
    #[serde(serialize_with = "serialize_compressor")]
    pub compressor: Compressor,
    /// Validated compressor tuning record, explicit or defaulted.
    pub options: CompressorOptions,
    /// Raw superblock feature flags.
    pub flags: SuperFlags,
    /// Bytes of the archive actually used.
    pub bytes_used: u64,
}

/// Read the superblock from `source` and return its basic stats without
/// touching any table.
pub fn read_stats(source: &dyn ImageSource) -> Result<Stats> {
    let meta = SuperMeta::load(source)?;

    Ok(Stats {
        inodes: meta.inode_count,
        mod_time: meta.mod_time,
        block_size: meta.block_size,
        frag_count: meta.frag_count,
        compressor: meta.compressor,
        options: meta.options,
        flags: meta.flags,
        bytes_used: meta.bytes_used,
    })
}
