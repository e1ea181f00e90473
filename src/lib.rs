// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Read-only access to SquashFS v4.0 filesystem images.
//!
//! A SquashFS image is a compressed, block-addressable archive holding a
//! whole directory tree. This crate parses the on-disk format on demand:
//! opening an image only reads and validates the 96-byte superblock, and
//! every later operation (path lookup, directory listing, file reads) pulls
//! in exactly the metadata and data blocks it needs, sharing one LRU cache
//! of decompressed blocks across all open handles.
//!
//! ```no_run
//! use sqfs::SquashFs;
//!
//! # fn main() -> sqfs::Result<()> {
//! let file = std::fs::File::open("image.sqfs").map_err(sqfs::Error::Io)?;
//! let fs = SquashFs::open(file)?;
//! let data = fs.read_file("/etc/hostname")?;
//! # let _ = data;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;
#[macro_use]
extern crate bitflags;

mod directory;
mod error;
mod file;
mod fs;
mod inode;
mod metadata;
mod resolve;
mod superblock;

pub use sqfs_storage::source::ImageSource;
pub use sqfs_utils::compress::Compressor;

pub use directory::{Dir, DirEntry};
pub use error::{Error, Result};
pub use file::File;
pub use fs::{SquashFs, DEFAULT_CACHE_SIZE};
pub use inode::{CommonStat, Entry, FileType, Inode};
pub use superblock::{read_stats, CompressorOptions, Stats, SuperFlags};
