// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Inode decoding.
//!
//! Every filesystem object is described by a fixed-layout inode record in
//! the inode table: a 16-byte common prefix (type tag, permissions,
//! uid/gid indices, mtime, inode number) followed by a type-specific tail.
//! Each kind exists in a basic and an extended encoding; both decode into
//! one variant here, with the extended-only fields falling back to the
//! `0xffffffff` disabled sentinel or a sensible fixed value.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::fs::Image;
use crate::metadata::{lookup_table_stream, MetadataStream};

pub(crate) const INODE_BASIC_DIR: u16 = 1;
pub(crate) const INODE_BASIC_FILE: u16 = 2;
pub(crate) const INODE_BASIC_SYMLINK: u16 = 3;
pub(crate) const INODE_BASIC_BLOCK: u16 = 4;
pub(crate) const INODE_BASIC_CHAR: u16 = 5;
pub(crate) const INODE_BASIC_PIPE: u16 = 6;
pub(crate) const INODE_BASIC_SOCK: u16 = 7;
pub(crate) const INODE_EXT_DIR: u16 = 8;
pub(crate) const INODE_EXT_FILE: u16 = 9;
pub(crate) const INODE_EXT_SYMLINK: u16 = 10;
pub(crate) const INODE_EXT_BLOCK: u16 = 11;
pub(crate) const INODE_EXT_CHAR: u16 = 12;
pub(crate) const INODE_EXT_PIPE: u16 = 13;
pub(crate) const INODE_EXT_SOCK: u16 = 14;

/// Sentinel for u32 fields absent from the basic inode encodings.
pub(crate) const FIELD_DISABLED: u32 = 0xffff_ffff;

/// Fields shared by every inode variant.
#[derive(Clone, Copy, Debug)]
pub struct CommonStat {
    /// Permission bits, the low 12 bits of the mode.
    pub perms: u16,
    /// Owning user id, resolved through the ID table.
    pub uid: u32,
    /// Owning group id, resolved through the ID table.
    pub gid: u32,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: u32,
    /// Inode number.
    pub inode: u32,
}

/// An entry of an extended directory's fast-lookup index.
#[derive(Clone, Debug)]
#[allow(dead_code)]
pub(crate) struct DirIndex {
    pub index: u32,
    pub start_block: u32,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct DirInode {
    pub(crate) common: CommonStat,
    pub(crate) start_block: u32,
    pub(crate) nlink: u32,
    pub(crate) file_size: u32,
    pub(crate) block_offset: u16,
    pub(crate) parent_inode: u32,
    /// Fast-lookup index of extended directories; carried but not yet
    /// consulted during lookups.
    #[allow(dead_code)]
    pub(crate) index: Vec<DirIndex>,
    pub(crate) xattr_index: u32,
}

#[derive(Clone, Debug)]
pub struct FileInode {
    pub(crate) common: CommonStat,
    pub(crate) blocks_start: u64,
    pub(crate) file_size: u64,
    pub(crate) sparse: u64,
    pub(crate) nlink: u32,
    pub(crate) frag_index: u32,
    pub(crate) frag_offset: u32,
    pub(crate) xattr_index: u32,
    pub(crate) block_sizes: Vec<u32>,
}

#[derive(Clone, Debug)]
pub struct SymlinkInode {
    pub(crate) common: CommonStat,
    pub(crate) nlink: u32,
    pub(crate) target: String,
    pub(crate) xattr_index: u32,
}

#[derive(Clone, Debug)]
pub struct DeviceInode {
    pub(crate) common: CommonStat,
    pub(crate) nlink: u32,
    pub(crate) device: u32,
    pub(crate) xattr_index: u32,
}

#[derive(Clone, Debug)]
pub struct IpcInode {
    pub(crate) common: CommonStat,
    pub(crate) nlink: u32,
    pub(crate) xattr_index: u32,
}

/// A decoded inode, tagged by kind.
#[derive(Clone, Debug)]
pub enum Inode {
    Dir(DirInode),
    File(FileInode),
    Symlink(SymlinkInode),
    BlockDevice(DeviceInode),
    CharDevice(DeviceInode),
    Fifo(IpcInode),
    Socket(IpcInode),
}

/// The kind of a filesystem object.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    Dir,
    Regular,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl FileType {
    pub(crate) fn from_inode_type(typ: u16) -> Option<FileType> {
        match typ {
            INODE_BASIC_DIR | INODE_EXT_DIR => Some(FileType::Dir),
            INODE_BASIC_FILE | INODE_EXT_FILE => Some(FileType::Regular),
            INODE_BASIC_SYMLINK | INODE_EXT_SYMLINK => Some(FileType::Symlink),
            INODE_BASIC_BLOCK | INODE_EXT_BLOCK => Some(FileType::BlockDevice),
            INODE_BASIC_CHAR | INODE_EXT_CHAR => Some(FileType::CharDevice),
            INODE_BASIC_PIPE | INODE_EXT_PIPE => Some(FileType::Fifo),
            INODE_BASIC_SOCK | INODE_EXT_SOCK => Some(FileType::Socket),
            _ => None,
        }
    }

    /// The `S_IFMT` bits for this kind.
    pub fn mode_bits(self) -> u32 {
        match self {
            FileType::Dir => libc::S_IFDIR as u32,
            FileType::Regular => libc::S_IFREG as u32,
            FileType::Symlink => libc::S_IFLNK as u32,
            FileType::BlockDevice => libc::S_IFBLK as u32,
            FileType::CharDevice => libc::S_IFCHR as u32,
            FileType::Fifo => libc::S_IFIFO as u32,
            FileType::Socket => libc::S_IFSOCK as u32,
        }
    }

    /// Whether this is a directory.
    pub fn is_dir(self) -> bool {
        self == FileType::Dir
    }
}

/// A named, decoded filesystem object: the stat record every lookup
/// produces.
#[derive(Clone, Debug)]
pub struct Entry {
    pub(crate) name: String,
    pub(crate) inode: Inode,
}

impl Entry {
    /// Base name of the entry; empty for the root.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields shared by every inode kind.
    pub fn common(&self) -> &CommonStat {
        match &self.inode {
            Inode::Dir(i) => &i.common,
            Inode::File(i) => &i.common,
            Inode::Symlink(i) => &i.common,
            Inode::BlockDevice(i) | Inode::CharDevice(i) => &i.common,
            Inode::Fifo(i) | Inode::Socket(i) => &i.common,
        }
    }

    /// The decoded inode record.
    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    pub fn file_type(&self) -> FileType {
        match &self.inode {
            Inode::Dir(_) => FileType::Dir,
            Inode::File(_) => FileType::Regular,
            Inode::Symlink(_) => FileType::Symlink,
            Inode::BlockDevice(_) => FileType::BlockDevice,
            Inode::CharDevice(_) => FileType::CharDevice,
            Inode::Fifo(_) => FileType::Fifo,
            Inode::Socket(_) => FileType::Socket,
        }
    }

    /// Full mode word: `S_IFMT` bits of the kind plus the permission bits.
    pub fn mode(&self) -> u32 {
        self.file_type().mode_bits() | self.common().perms as u32
    }

    /// Size in bytes; zero for everything but regular files.
    pub fn size(&self) -> u64 {
        match &self.inode {
            Inode::File(f) => f.file_size,
            _ => 0,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.inode, Inode::Dir(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self.inode, Inode::File(_))
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.inode, Inode::Symlink(_))
    }

    pub fn uid(&self) -> u32 {
        self.common().uid
    }

    pub fn gid(&self) -> u32 {
        self.common().gid
    }

    /// Inode number.
    pub fn ino(&self) -> u32 {
        self.common().inode
    }

    /// Modification time.
    pub fn modified(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.common().mtime as u64)
    }

    /// Modification time, raw seconds since the Unix epoch.
    pub fn mtime(&self) -> u32 {
        self.common().mtime
    }

    /// Link target when this entry is a symlink.
    pub fn symlink_target(&self) -> Option<&str> {
        match &self.inode {
            Inode::Symlink(s) => Some(&s.target),
            _ => None,
        }
    }

    /// Device number when this entry is a block or character device.
    pub fn device(&self) -> Option<u32> {
        match &self.inode {
            Inode::BlockDevice(d) | Inode::CharDevice(d) => Some(d.device),
            _ => None,
        }
    }

    /// Hard link count recorded in the inode; basic file inodes carry
    /// none and report one.
    pub fn nlink(&self) -> u32 {
        match &self.inode {
            Inode::Dir(i) => i.nlink,
            Inode::File(i) => i.nlink.max(1),
            Inode::Symlink(i) => i.nlink,
            Inode::BlockDevice(i) | Inode::CharDevice(i) => i.nlink,
            Inode::Fifo(i) | Inode::Socket(i) => i.nlink,
        }
    }

    /// Inode number of the parent directory, for directories.
    pub fn parent_ino(&self) -> Option<u32> {
        match &self.inode {
            Inode::Dir(d) => Some(d.parent_inode),
            _ => None,
        }
    }

    /// Bytes saved by sparse blocks, as recorded by extended file inodes.
    pub fn sparse_bytes(&self) -> u64 {
        match &self.inode {
            Inode::File(f) => f.sparse,
            _ => 0,
        }
    }

    /// Index into the xattr table, when the inode carries one. Extended
    /// attributes themselves are not decoded.
    pub fn xattr_index(&self) -> Option<u32> {
        let index = match &self.inode {
            Inode::Dir(i) => i.xattr_index,
            Inode::File(i) => i.xattr_index,
            Inode::Symlink(i) => i.xattr_index,
            Inode::BlockDevice(i) | Inode::CharDevice(i) => i.xattr_index,
            Inode::Fifo(i) | Inode::Socket(i) => i.xattr_index,
        };
        (index != FIELD_DISABLED).then_some(index)
    }
}

/// Decode the inode at metadata pointer `pointer` into an [`Entry`] named
/// `name`.
pub(crate) fn entry_at(image: &Arc<Image>, pointer: u64, name: &str) -> Result<Entry> {
    let mut stream = MetadataStream::new(image.clone(), pointer, image.meta.inode_table)?;

    let typ = stream.read_u16()?;
    let perms = stream.read_u16()?;
    let uid_index = stream.read_u16()?;
    let gid_index = stream.read_u16()?;
    let mtime = stream.read_u32()?;
    let inode_number = stream.read_u32()?;

    let common = CommonStat {
        perms,
        uid: get_id(image, uid_index)?,
        gid: get_id(image, gid_index)?,
        mtime,
        inode: inode_number,
    };

    let block_size = image.meta.block_size;
    let inode = match typ {
        INODE_BASIC_DIR => Inode::Dir(read_basic_dir(&mut stream, common)?),
        INODE_EXT_DIR => Inode::Dir(read_ext_dir(&mut stream, common)?),
        INODE_BASIC_FILE => Inode::File(read_basic_file(&mut stream, common, block_size)?),
        INODE_EXT_FILE => Inode::File(read_ext_file(&mut stream, common, block_size)?),
        INODE_BASIC_SYMLINK => Inode::Symlink(read_symlink(&mut stream, common, false)?),
        INODE_EXT_SYMLINK => Inode::Symlink(read_symlink(&mut stream, common, true)?),
        INODE_BASIC_BLOCK => Inode::BlockDevice(read_device(&mut stream, common, false)?),
        INODE_EXT_BLOCK => Inode::BlockDevice(read_device(&mut stream, common, true)?),
        INODE_BASIC_CHAR => Inode::CharDevice(read_device(&mut stream, common, false)?),
        INODE_EXT_CHAR => Inode::CharDevice(read_device(&mut stream, common, true)?),
        INODE_BASIC_PIPE => Inode::Fifo(read_ipc(&mut stream, common, false)?),
        INODE_EXT_PIPE => Inode::Fifo(read_ipc(&mut stream, common, true)?),
        INODE_BASIC_SOCK => Inode::Socket(read_ipc(&mut stream, common, false)?),
        INODE_EXT_SOCK => Inode::Socket(read_ipc(&mut stream, common, true)?),
        _ => return Err(Error::Invalid),
    };

    Ok(Entry {
        name: name.to_string(),
        inode,
    })
}

/// Resolve an on-disk uid/gid index through the ID lookup table.
pub(crate) fn get_id(image: &Arc<Image>, index: u16) -> Result<u32> {
    if index >= image.meta.id_count {
        return Err(Error::Invalid);
    }

    let mut stream = lookup_table_stream(image, image.meta.id_table, index as u64, 2)?;
    stream.read_u32()
}

fn read_basic_dir(stream: &mut MetadataStream, common: CommonStat) -> Result<DirInode> {
    Ok(DirInode {
        common,
        start_block: stream.read_u32()?,
        nlink: stream.read_u32()?,
        file_size: stream.read_u16()? as u32,
        block_offset: stream.read_u16()?,
        parent_inode: stream.read_u32()?,
        index: Vec::new(),
        xattr_index: FIELD_DISABLED,
    })
}

fn read_ext_dir(stream: &mut MetadataStream, common: CommonStat) -> Result<DirInode> {
    let nlink = stream.read_u32()?;
    let file_size = stream.read_u32()?;
    let start_block = stream.read_u32()?;
    let parent_inode = stream.read_u32()?;
    let index_count = stream.read_u16()?;
    let block_offset = stream.read_u16()?;
    let xattr_index = stream.read_u32()?;

    let mut index = Vec::with_capacity(index_count as usize);
    for _ in 0..index_count {
        let idx = stream.read_u32()?;
        let start_block = stream.read_u32()?;
        let name_len = stream.read_u32()? as usize + 1;
        let name = read_name(stream, name_len)?;
        index.push(DirIndex {
            index: idx,
            start_block,
            name,
        });
    }

    Ok(DirInode {
        common,
        start_block,
        nlink,
        file_size,
        block_offset,
        parent_inode,
        index,
        xattr_index,
    })
}

/// Number of block-size entries a file inode carries: every block when the
/// tail lives in the last block, one fewer when it lives in a fragment.
fn block_count(file_size: u64, frag_index: u32, block_size: u32) -> u64 {
    if file_size == 0 {
        0
    } else if frag_index == FIELD_DISABLED {
        sqfs_utils::div_round_up(file_size, block_size as u64)
    } else {
        file_size / block_size as u64
    }
}

fn read_block_sizes(
    stream: &mut MetadataStream,
    file_size: u64,
    frag_index: u32,
    block_size: u32,
) -> Result<Vec<u32>> {
    let count = block_count(file_size, frag_index, block_size);
    let mut sizes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        sizes.push(stream.read_u32()?);
    }
    Ok(sizes)
}

fn read_basic_file(
    stream: &mut MetadataStream,
    common: CommonStat,
    block_size: u32,
) -> Result<FileInode> {
    let blocks_start = stream.read_u32()? as u64;
    let frag_index = stream.read_u32()?;
    let frag_offset = stream.read_u32()?;
    let file_size = stream.read_u32()? as u64;
    let block_sizes = read_block_sizes(stream, file_size, frag_index, block_size)?;

    Ok(FileInode {
        common,
        blocks_start,
        file_size,
        sparse: 0,
        nlink: 1,
        frag_index,
        frag_offset,
        xattr_index: FIELD_DISABLED,
        block_sizes,
    })
}

fn read_ext_file(
    stream: &mut MetadataStream,
    common: CommonStat,
    block_size: u32,
) -> Result<FileInode> {
    let blocks_start = stream.read_u64()?;
    let file_size = stream.read_u64()?;
    let sparse = stream.read_u64()?;
    let nlink = stream.read_u32()?;
    let frag_index = stream.read_u32()?;
    let frag_offset = stream.read_u32()?;
    let xattr_index = stream.read_u32()?;
    let block_sizes = read_block_sizes(stream, file_size, frag_index, block_size)?;

    Ok(FileInode {
        common,
        blocks_start,
        file_size,
        sparse,
        nlink,
        frag_index,
        frag_offset,
        xattr_index,
        block_sizes,
    })
}

fn read_symlink(
    stream: &mut MetadataStream,
    common: CommonStat,
    extended: bool,
) -> Result<SymlinkInode> {
    let nlink = stream.read_u32()?;
    let target_size = stream.read_u32()? as usize;
    let target = read_name(stream, target_size)?;
    let xattr_index = if extended {
        stream.read_u32()?
    } else {
        FIELD_DISABLED
    };

    Ok(SymlinkInode {
        common,
        nlink,
        target,
        xattr_index,
    })
}

fn read_device(
    stream: &mut MetadataStream,
    common: CommonStat,
    extended: bool,
) -> Result<DeviceInode> {
    let nlink = stream.read_u32()?;
    let device = stream.read_u32()?;
    let xattr_index = if extended {
        stream.read_u32()?
    } else {
        FIELD_DISABLED
    };

    Ok(DeviceInode {
        common,
        nlink,
        device,
        xattr_index,
    })
}

fn read_ipc(stream: &mut MetadataStream, common: CommonStat, extended: bool) -> Result<IpcInode> {
    let nlink = stream.read_u32()?;
    let xattr_index = if extended {
        stream.read_u32()?
    } else {
        FIELD_DISABLED
    };

    Ok(IpcInode {
        common,
        nlink,
        xattr_index,
    })
}

/// Read `len` raw bytes as a name or symlink target.
pub(crate) fn read_name(stream: &mut MetadataStream, len: usize) -> Result<String> {
    let bytes = stream.read_bytes(len)?;
    String::from_utf8(bytes).map_err(|_| Error::Invalid)
}
